use axum::response::Response;
use keel_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::{PrincipalContext, TenantContext};

/// Associates the permissions a command needs with the command itself.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: &[Permission]) -> Self {
        Self {
            inner,
            required: required.to_vec(),
        }
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Read-side permission check.
pub fn guard(tenant: &TenantContext, principal: &PrincipalContext, permission: &Permission) -> Result<(), Response> {
    crate::authz::require(tenant, principal, permission).map_err(errors::authz_error_to_response)
}

/// Check a command's permissions before it reaches the dispatcher.
pub fn authorize<C>(tenant: &TenantContext, principal: &PrincipalContext, cmd: &CmdAuth<C>) -> Result<(), Response> {
    crate::authz::authorize_command(tenant, principal, cmd).map_err(errors::authz_error_to_response)
}
