//! `keel-auth`: authentication and authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer feeds it bearer tokens and
//! commands, and gets back claims or an authorization verdict.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use policy::{membership_for, role_permissions};
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
