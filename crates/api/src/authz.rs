//! API-side authorization guard.
//!
//! Enforced at the command boundary (before dispatch) and on reads, while
//! domain aggregates and infra stay auth-agnostic.

use keel_auth::{AuthzError, CommandAuthorization, Permission, Principal, authorize, membership_for};

use crate::context::{PrincipalContext, TenantContext};

fn principal_for(tenant: &TenantContext, principal: &PrincipalContext) -> Principal {
    Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: membership_for(tenant.tenant_id(), principal.roles()),
    }
}

/// Check every permission a command requires. Call before dispatching.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = principal_for(tenant, principal);
    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }
    Ok(())
}

/// Check a single permission (queries and non-command actions).
pub fn require(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &Permission,
) -> Result<(), AuthzError> {
    authorize(&principal_for(tenant, principal), permission)
}
