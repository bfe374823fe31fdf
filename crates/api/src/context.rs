use keel_auth::{PrincipalId, Role};
use keel_core::{TenantId, UserId};

/// Tenant context for a request, taken from the bearer token.
///
/// Immutable; present on every route behind the auth middleware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Authenticated identity and roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// The principal as recorded on events (e.g. payroll approver).
    pub fn user_id(&self) -> UserId {
        self.principal_id.as_user_id()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
