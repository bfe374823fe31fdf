use thiserror::Error;

use keel_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// A principal resolved for one authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Implemented by commands that need permissions; checked before dispatch.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Pure policy check of one permission within the principal's active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal
        .membership
        .permissions
        .iter()
        .any(|held| held.grants(required))
    {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
