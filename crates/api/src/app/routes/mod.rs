use axum::{routing::get, Router};

pub mod common;
pub mod employees;
pub mod invoices;
pub mod ledger;
pub mod payroll;
pub mod recurring;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/employees", employees::router())
        .nest("/payroll", payroll::router())
        .nest("/invoices", invoices::router())
        .nest("/recurring-invoices", recurring::router())
        .nest("/ledger", ledger::router())
}
