use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use serde_json::json;

use keel_accounting::AccountKind;
use keel_auth::AuthzError;
use keel_core::AggregateId;
use keel_infra::command_dispatcher::DispatchError;
use keel_payroll::PayPeriod;

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event no longer deserializes");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => {
            tracing::error!(error = %msg, "events stored but not published");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn authz_error_to_response(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn not_found(what: &str) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

/// `YYYY-MM`.
pub fn parse_period(raw: &str) -> Result<PayPeriod, Response> {
    raw.parse::<PayPeriod>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_period", e.to_string()))
}

/// `YYYY-MM-DD`; `None` means today (UTC).
pub fn parse_date_or_today(raw: Option<&str>) -> Result<NaiveDate, Response> {
    match raw {
        None => Ok(chrono::Utc::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_date", "date must be YYYY-MM-DD")),
    }
}

pub fn parse_account_kind(s: &str) -> Result<AccountKind, Response> {
    match s.to_lowercase().as_str() {
        "asset" => Ok(AccountKind::Asset),
        "liability" => Ok(AccountKind::Liability),
        "equity" => Ok(AccountKind::Equity),
        "revenue" => Ok(AccountKind::Revenue),
        "expense" => Ok(AccountKind::Expense),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_account_kind",
            "kind must be one of: asset, liability, equity, revenue, expense",
        )),
    }
}
