use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use keel_auth::permissions::{PAYROLL_APPROVE, PAYROLL_PROCESS, PAYROLL_READ};
use keel_infra::event_store::StoredEvent;
use keel_infra::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE;
use keel_infra::read_model::Page;
use keel_payroll::{
    ApprovePayrollRun, CancelPayrollRun, CreatePayrollRun, PayPeriod, PayrollRun, PayrollRunCommand, PayrollRunId,
};

use crate::app::routes::common::{CmdAuth, authorize, guard};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/runs", post(create_run).get(list_runs))
        .route("/runs/:period", get(get_run))
        .route("/runs/:period/process", post(process_run))
        .route("/runs/:period/approve", post(approve_run))
        .route("/runs/:period/cancel", post(cancel_run))
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    period: PayPeriod,
    cmd: CmdAuth<PayrollRunCommand>,
) -> Result<Vec<StoredEvent>, Response> {
    authorize(tenant, principal, &cmd)?;
    let run_id = PayrollRunId::for_period(tenant.tenant_id(), period);
    services
        .dispatch(
            tenant.tenant_id(),
            run_id.0,
            PAYROLL_RUN_AGGREGATE_TYPE,
            cmd.inner,
            |_t, id| PayrollRun::empty(PayrollRunId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePayrollRunRequest>,
) -> Response {
    let run_id = PayrollRunId::for_period(tenant.tenant_id(), body.period);
    let cmd = PayrollRunCommand::CreatePayrollRun(CreatePayrollRun {
        tenant_id: tenant.tenant_id(),
        run_id,
        period: body.period,
        pay_date: body.pay_date,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, body.period, CmdAuth::new(cmd, &[PAYROLL_PROCESS])) {
        Ok(committed) => dto::created(run_id.0, &committed),
        Err(resp) => resp,
    }
}

pub async fn list_runs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::PageQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &PAYROLL_READ) {
        return resp;
    }
    let runs = services.payroll_runs.list(tenant.tenant_id());
    Json(Page::slice(runs, q.pagination())).into_response()
}

pub async fn get_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(period): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &PAYROLL_READ) {
        return resp;
    }
    let period = match errors::parse_period(&period) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match services.payroll_runs.get(tenant.tenant_id(), &period) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("payroll run"),
    }
}

/// Calculate payslips from the current employee read model. Re-processing a
/// run that has not been approved recalculates it.
pub async fn process_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(period): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &PAYROLL_PROCESS) {
        return resp;
    }
    let period = match errors::parse_period(&period) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match services.payroll.process(tenant.tenant_id(), period, Utc::now()) {
        Ok(committed) => dto::accepted(period, &committed),
        Err(err) => errors::dispatch_error_to_response(err),
    }
}

pub async fn approve_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(period): Path<String>,
) -> Response {
    let period = match errors::parse_period(&period) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let cmd = PayrollRunCommand::ApprovePayrollRun(ApprovePayrollRun {
        tenant_id: tenant.tenant_id(),
        run_id: PayrollRunId::for_period(tenant.tenant_id(), period),
        approved_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, period, CmdAuth::new(cmd, &[PAYROLL_APPROVE])) {
        Ok(committed) => dto::accepted(period, &committed),
        Err(resp) => resp,
    }
}

pub async fn cancel_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(period): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let period = match errors::parse_period(&period) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    let cmd = PayrollRunCommand::CancelPayrollRun(CancelPayrollRun {
        tenant_id: tenant.tenant_id(),
        run_id: PayrollRunId::for_period(tenant.tenant_id(), period),
        reason,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, period, CmdAuth::new(cmd, &[PAYROLL_PROCESS])) {
        Ok(committed) => dto::accepted(period, &committed),
        Err(resp) => resp,
    }
}
