use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A named capability, e.g. `payroll.approve`.
///
/// Grants may use `*` (everything) or a `module.*` prefix wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self == required {
            return true;
        }
        match self.as_str().strip_suffix(".*") {
            Some(module) => required
                .as_str()
                .strip_prefix(module)
                .is_some_and(|rest| rest.starts_with('.')),
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const EMPLOYEES_READ: Permission = Permission::from_static("employees.read");
pub const EMPLOYEES_WRITE: Permission = Permission::from_static("employees.write");
pub const PAYROLL_READ: Permission = Permission::from_static("payroll.read");
pub const PAYROLL_PROCESS: Permission = Permission::from_static("payroll.process");
pub const PAYROLL_APPROVE: Permission = Permission::from_static("payroll.approve");
pub const INVOICES_READ: Permission = Permission::from_static("invoices.read");
pub const INVOICES_WRITE: Permission = Permission::from_static("invoices.write");
pub const RECURRING_READ: Permission = Permission::from_static("recurring.read");
pub const RECURRING_WRITE: Permission = Permission::from_static("recurring.write");
pub const RECURRING_RUN: Permission = Permission::from_static("recurring.run");
pub const LEDGER_READ: Permission = Permission::from_static("ledger.read");
pub const LEDGER_POST: Permission = Permission::from_static("ledger.post");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_wildcards_stop_at_the_module_boundary() {
        let payroll_all = Permission::new("payroll.*");
        assert!(payroll_all.grants(&PAYROLL_APPROVE));
        assert!(payroll_all.grants(&PAYROLL_READ));
        assert!(!payroll_all.grants(&LEDGER_POST));
        assert!(!Permission::new("pay.*").grants(&PAYROLL_READ));
    }

    #[test]
    fn star_grants_everything() {
        assert!(Permission::new("*").grants(&LEDGER_POST));
        assert!(!EMPLOYEES_READ.grants(&EMPLOYEES_WRITE));
    }
}
