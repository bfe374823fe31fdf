//! Built-in role to permission mapping.

use keel_core::TenantId;

use crate::roles::{ACCOUNTANT, ADMIN, BILLING_CLERK, HR_MANAGER, PAYROLL_OFFICER, VIEWER};
use crate::{Permission, Role, TenantMembership};

/// Permissions granted by a role. Unknown roles grant nothing.
pub fn role_permissions(role: &str) -> Vec<Permission> {
    let names: &[&'static str] = match role {
        ADMIN => &["*"],
        HR_MANAGER => &["employees.*", "payroll.read"],
        PAYROLL_OFFICER => &["employees.read", "payroll.*"],
        ACCOUNTANT => &[
            "ledger.*",
            "invoices.read",
            "recurring.read",
            "payroll.read",
        ],
        BILLING_CLERK => &["invoices.*", "recurring.*", "ledger.read"],
        VIEWER => &[
            "employees.read",
            "payroll.read",
            "invoices.read",
            "recurring.read",
            "ledger.read",
        ],
        _ => &[],
    };
    names.iter().map(|n| Permission::from_static(*n)).collect()
}

/// Resolve the membership a token's roles confer within `tenant_id`.
pub fn membership_for(tenant_id: TenantId, roles: &[Role]) -> TenantMembership {
    let mut permissions: Vec<Permission> = Vec::new();
    for role in roles {
        for p in role_permissions(role.as_str()) {
            if !permissions.contains(&p) {
                permissions.push(p);
            }
        }
    }
    TenantMembership {
        tenant_id,
        roles: roles.to_vec(),
        permissions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_roles_grant_nothing() {
        assert!(role_permissions("janitor").is_empty());
    }

    #[test]
    fn overlapping_roles_do_not_duplicate_permissions() {
        let m = membership_for(
            TenantId::new(),
            &[Role::new("viewer"), Role::new("accountant")],
        );
        let reads = m
            .permissions
            .iter()
            .filter(|p| p.as_str() == "payroll.read")
            .count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn every_builtin_role_grants_something() {
        for name in crate::roles::BUILTIN_ROLES {
            assert!(Role::from_static(name).is_builtin());
            assert!(!role_permissions(name).is_empty(), "{name} grants nothing");
        }
        assert!(!Role::new("janitor").is_builtin());
    }
}
