//! HTTP application wiring.
//!
//! - `services.rs`: event store, bus, projections and background workers
//! - `routes/`: handlers, one file per domain area
//! - `dto.rs`: request bodies, query strings and response helpers
//! - `errors.rs`: error bodies and status mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use keel_infra::config::Settings;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, ServicesError};

/// Build services from `settings` and the router around them. The caller
/// owns the returned services and should call `shutdown` when done serving.
pub async fn build_app(settings: &Settings) -> Result<(Router, Arc<AppServices>), ServicesError> {
    let services = services::build_services(settings).await?;
    Ok((router(services.clone(), &settings.auth.jwt_secret), services))
}

/// Router over already running services.
pub fn router(services: Arc<AppServices>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(keel_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware))
            .layer(Extension(services)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
