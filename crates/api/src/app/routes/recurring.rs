use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use keel_auth::permissions::{RECURRING_READ, RECURRING_RUN, RECURRING_WRITE};
use keel_core::AggregateId;
use keel_infra::event_store::StoredEvent;
use keel_infra::projections::recurring_invoices::RECURRING_AGGREGATE_TYPE;
use keel_infra::read_model::{Page, Pagination};
use keel_invoicing::{
    CancelRecurringInvoice, CreateRecurringInvoice, Frequency, PauseRecurringInvoice, RecurrenceRule,
    RecurringInvoice, RecurringInvoiceCommand, RecurringInvoiceId, ResumeRecurringInvoice, default_anchor,
};

use crate::app::routes::common::{CmdAuth, authorize, guard};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_schedule).get(list_schedules))
        .route("/run", post(run_due))
        .route("/:id", get(get_schedule))
        .route("/:id/pause", post(pause_schedule))
        .route("/:id/resume", post(resume_schedule))
        .route("/:id/cancel", post(cancel_schedule))
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    schedule_id: RecurringInvoiceId,
    cmd: RecurringInvoiceCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd_auth = CmdAuth::new(cmd, &[RECURRING_WRITE]);
    authorize(tenant, principal, &cmd_auth)?;
    services
        .dispatch(
            tenant.tenant_id(),
            schedule_id.0,
            RECURRING_AGGREGATE_TYPE,
            cmd_auth.inner,
            |_t, id| RecurringInvoice::empty(RecurringInvoiceId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

fn schedule_id(raw: &str) -> Result<RecurringInvoiceId, Response> {
    errors::parse_id(raw, "recurring invoice").map(RecurringInvoiceId::new)
}

pub async fn create_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateRecurringInvoiceRequest>,
) -> Response {
    let rule = RecurrenceRule {
        frequency: body.frequency.unwrap_or(Frequency::Monthly),
        interval: body.interval.unwrap_or(1),
        anchor_day: body.anchor_day.unwrap_or_else(|| default_anchor(body.start_date)),
    };

    let agg = AggregateId::new();
    let schedule_id = RecurringInvoiceId::new(agg);
    let cmd = RecurringInvoiceCommand::CreateRecurringInvoice(CreateRecurringInvoice {
        tenant_id: tenant.tenant_id(),
        schedule_id,
        customer: body.customer,
        lines: body.lines,
        rule,
        start_date: body.start_date,
        end_date: body.end_date,
        payment_terms_days: body.payment_terms_days.unwrap_or(dto::DEFAULT_PAYMENT_TERMS_DAYS),
        prorate: body.prorate.unwrap_or(false),
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, schedule_id, cmd) {
        Ok(committed) => dto::created(agg, &committed),
        Err(resp) => resp,
    }
}

pub async fn list_schedules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::RecurringListQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &RECURRING_READ) {
        return resp;
    }
    let schedules: Vec<_> = services
        .schedules
        .list(tenant.tenant_id())
        .into_iter()
        .filter(|s| q.status.is_none_or(|status| s.status == status))
        .collect();
    Json(Page::slice(schedules, Pagination::new(q.limit, q.offset))).into_response()
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &RECURRING_READ) {
        return resp;
    }
    let schedule_id = match schedule_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.schedules.get(tenant.tenant_id(), &schedule_id) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("recurring invoice"),
    }
}

pub async fn pause_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    let schedule_id = match schedule_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = RecurringInvoiceCommand::PauseRecurringInvoice(PauseRecurringInvoice {
        tenant_id: tenant.tenant_id(),
        schedule_id,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, schedule_id, cmd) {
        Ok(committed) => dto::accepted(schedule_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn resume_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ResumeRecurringInvoiceRequest>>,
) -> Response {
    let schedule_id = match schedule_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let resume_on = body
        .and_then(|Json(b)| b.resume_on)
        .unwrap_or_else(|| Utc::now().date_naive());
    let cmd = RecurringInvoiceCommand::ResumeRecurringInvoice(ResumeRecurringInvoice {
        tenant_id: tenant.tenant_id(),
        schedule_id,
        resume_on,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, schedule_id, cmd) {
        Ok(committed) => dto::accepted(schedule_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn cancel_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let schedule_id = match schedule_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = RecurringInvoiceCommand::CancelRecurringInvoice(CancelRecurringInvoice {
        tenant_id: tenant.tenant_id(),
        schedule_id,
        reason: body.and_then(|Json(b)| b.reason),
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, schedule_id, cmd) {
        Ok(committed) => dto::accepted(schedule_id, &committed),
        Err(resp) => resp,
    }
}

/// Bill everything due for the caller's tenant on `as_of` (default today).
pub async fn run_due(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::AsOfQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &RECURRING_RUN) {
        return resp;
    }
    let as_of = match errors::parse_date_or_today(q.as_of.as_deref()) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let report = services.scheduler.run_due(tenant.tenant_id(), as_of, Utc::now());
    info!(tenant_id = %tenant.tenant_id(), %as_of, generated = report.generated, "on-demand scheduler run");
    Json(report).into_response()
}
