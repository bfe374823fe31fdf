use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use keel_auth::JwtValidator;

use crate::app::errors::json_error;
use crate::context::{PrincipalContext, TenantContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Validates the bearer token and attaches tenant and principal contexts.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "missing bearer token"))?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        json_error(StatusCode::UNAUTHORIZED, "unauthenticated", e.to_string())
    })?;

    if let Some(role) = claims.roles.iter().find(|r| !r.is_builtin()) {
        tracing::debug!(%role, "token carries a role without built-in permissions");
    }

    req.extensions_mut().insert(TenantContext::new(claims.tenant_id));
    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.roles));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
