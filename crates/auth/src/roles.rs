use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub const ADMIN: &str = "admin";
pub const HR_MANAGER: &str = "hr_manager";
pub const PAYROLL_OFFICER: &str = "payroll_officer";
pub const ACCOUNTANT: &str = "accountant";
pub const BILLING_CLERK: &str = "billing_clerk";
pub const VIEWER: &str = "viewer";

/// Roles with a built-in permission set. Other names are accepted in tokens
/// but grant nothing.
pub const BUILTIN_ROLES: [&str; 6] = [ADMIN, HR_MANAGER, PAYROLL_OFFICER, ACCOUNTANT, BILLING_CLERK, VIEWER];

/// A role name as it appears in token claims (e.g. `payroll_officer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_builtin(&self) -> bool {
        BUILTIN_ROLES.contains(&self.as_str())
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
