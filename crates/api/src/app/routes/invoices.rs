use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};

use keel_auth::permissions::{INVOICES_READ, INVOICES_WRITE};
use keel_core::AggregateId;
use keel_infra::event_store::StoredEvent;
use keel_infra::projections::invoices::INVOICE_AGGREGATE_TYPE;
use keel_infra::read_model::{Page, Pagination};
use keel_invoicing::{Invoice, InvoiceCommand, InvoiceId, IssueInvoice, RegisterPayment, VoidInvoice};

use crate::app::routes::common::{CmdAuth, authorize, guard};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_invoice).get(list_invoices))
        .route("/overdue", get(overdue_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/payments", post(register_payment))
        .route("/:id/void", post(void_invoice))
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    invoice_id: InvoiceId,
    cmd: InvoiceCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd_auth = CmdAuth::new(cmd, &[INVOICES_WRITE]);
    authorize(tenant, principal, &cmd_auth)?;
    services
        .dispatch(
            tenant.tenant_id(),
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            cmd_auth.inner,
            |_t, id| Invoice::empty(InvoiceId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn issue_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::IssueInvoiceRequest>,
) -> Response {
    let issue_date = body.issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let due_date = match body.due_date {
        Some(d) => d,
        None => {
            let terms = body.payment_terms_days.unwrap_or(dto::DEFAULT_PAYMENT_TERMS_DAYS);
            match issue_date.checked_add_signed(Duration::days(i64::from(terms))) {
                Some(d) => d,
                None => {
                    return errors::json_error(
                        StatusCode::BAD_REQUEST,
                        "validation_error",
                        "due date is out of range",
                    );
                }
            }
        }
    };

    let agg = AggregateId::new();
    let invoice_id = InvoiceId::new(agg);
    let cmd = InvoiceCommand::IssueInvoice(IssueInvoice {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        customer: body.customer,
        lines: body.lines,
        issue_date,
        due_date,
        source: None,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, invoice_id, cmd) {
        Ok(committed) => dto::created(agg, &committed),
        Err(resp) => resp,
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::InvoiceListQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &INVOICES_READ) {
        return resp;
    }
    let invoices: Vec<_> = services
        .invoices
        .list(tenant.tenant_id())
        .into_iter()
        .filter(|i| q.status.is_none_or(|s| i.status == s))
        .collect();
    Json(Page::slice(invoices, Pagination::new(q.limit, q.offset))).into_response()
}

/// Open invoices past due on `as_of` (default today), oldest first.
pub async fn overdue_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::AsOfQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &INVOICES_READ) {
        return resp;
    }
    let as_of = match errors::parse_date_or_today(q.as_of.as_deref()) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    Json(services.invoices.overdue(tenant.tenant_id(), as_of)).into_response()
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &INVOICES_READ) {
        return resp;
    }
    let agg = match errors::parse_id(&id, "invoice") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.invoices.get(tenant.tenant_id(), &InvoiceId::new(agg)) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("invoice"),
    }
}

pub async fn register_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterPaymentRequest>,
) -> Response {
    let invoice_id = match errors::parse_id(&id, "invoice") {
        Ok(v) => InvoiceId::new(v),
        Err(resp) => return resp,
    };
    let cmd = InvoiceCommand::RegisterPayment(RegisterPayment {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        amount: body.amount,
        paid_on: body.paid_on.unwrap_or_else(|| Utc::now().date_naive()),
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, invoice_id, cmd) {
        Ok(committed) => dto::accepted(invoice_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn void_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let invoice_id = match errors::parse_id(&id, "invoice") {
        Ok(v) => InvoiceId::new(v),
        Err(resp) => return resp,
    };
    let cmd = InvoiceCommand::VoidInvoice(VoidInvoice {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        reason: body.and_then(|Json(b)| b.reason),
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, invoice_id, cmd) {
        Ok(committed) => dto::accepted(invoice_id, &committed),
        Err(resp) => resp,
    }
}
