use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use keel_auth::permissions::{LEDGER_POST, LEDGER_READ};
use keel_accounting::{JournalCommand, Ledger, LedgerId, PostJournalEntry, ReverseJournalEntry};
use keel_infra::event_store::StoredEvent;
use keel_infra::projections::ledger::LEDGER_AGGREGATE_TYPE;
use keel_infra::read_model::Page;

use crate::app::routes::common::{CmdAuth, authorize, guard};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/balances", get(balances))
        .route("/trial-balance", get(trial_balance))
        .route("/entries", get(list_entries).post(post_entry))
        .route("/entries/:id", get(get_entry))
        .route("/entries/:id/reverse", post(reverse_entry))
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    cmd: JournalCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd_auth = CmdAuth::new(cmd, &[LEDGER_POST]);
    authorize(tenant, principal, &cmd_auth)?;
    let ledger_id = LedgerId::for_tenant(tenant.tenant_id());
    services
        .dispatch(
            tenant.tenant_id(),
            ledger_id.0,
            LEDGER_AGGREGATE_TYPE,
            cmd_auth.inner,
            |_t, id| Ledger::empty(LedgerId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

fn entry_id(raw: &str) -> Result<Uuid, Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid journal entry id"))
}

pub async fn balances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &LEDGER_READ) {
        return resp;
    }
    Json(services.ledger.balances(tenant.tenant_id())).into_response()
}

pub async fn trial_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &LEDGER_READ) {
        return resp;
    }
    Json(services.ledger.trial_balance(tenant.tenant_id())).into_response()
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::PageQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &LEDGER_READ) {
        return resp;
    }
    let entries = services.ledger.entries(tenant.tenant_id());
    Json(Page::slice(entries, q.pagination())).into_response()
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &LEDGER_READ) {
        return resp;
    }
    let entry_id = match entry_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.ledger.entry(tenant.tenant_id(), entry_id) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("journal entry"),
    }
}

/// Manual journal entry. Lines must balance; the aggregate rejects anything else.
pub async fn post_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PostJournalEntryRequest>,
) -> Response {
    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        match dto::journal_line(&services.chart, line) {
            Ok(l) => lines.push(l),
            Err(resp) => return resp,
        }
    }

    let entry_id = Uuid::now_v7();
    let cmd = JournalCommand::PostJournalEntry(PostJournalEntry {
        tenant_id: tenant.tenant_id(),
        ledger_id: LedgerId::for_tenant(tenant.tenant_id()),
        entry_id,
        entry_date: body.entry_date,
        lines,
        description: body.description,
        source: None,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, cmd) {
        Ok(committed) => dto::created(entry_id, &committed),
        Err(resp) => resp,
    }
}

/// Post the mirror image of an entry. The response id is the reversal entry.
pub async fn reverse_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReverseJournalEntryRequest>>,
) -> Response {
    let entry_id = match entry_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let reversal_entry_id = Uuid::now_v7();
    let cmd = JournalCommand::ReverseJournalEntry(ReverseJournalEntry {
        tenant_id: tenant.tenant_id(),
        ledger_id: LedgerId::for_tenant(tenant.tenant_id()),
        entry_id,
        reversal_entry_id,
        reversal_date: body.reversal_date.unwrap_or_else(|| Utc::now().date_naive()),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, cmd) {
        Ok(committed) => dto::created(reversal_entry_id, &committed),
        Err(resp) => resp,
    }
}
