use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;

use keel_core::TenantId;
use keel_events::EventEnvelope;
use keel_invoicing::{
    CustomerRef, InvoiceEvent, InvoiceId, InvoiceLine, InvoiceSource, InvoiceStatus, RecurringInvoiceId,
};

use crate::projections::cursor::{ProjectionError, StreamCursors, decode, ensure_same_tenant, replay_order};
use crate::read_model::TenantStore;

pub const INVOICE_AGGREGATE_TYPE: &str = "invoicing.invoice";

/// Queryable invoice: header, lines and payment position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub customer: CustomerRef,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub total_amount: u64,
    pub total_paid: u64,
    pub outstanding: u64,
    pub lines: Vec<InvoiceLine>,
    pub source: Option<InvoiceSource>,
    pub void_reason: Option<String>,
}

impl InvoiceReadModel {
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.status == InvoiceStatus::Open && self.outstanding > 0 && self.due_date < as_of
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueInvoice {
    #[serde(flatten)]
    pub invoice: InvoiceReadModel,
    pub days_overdue: i64,
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(tenant_id, invoice_id)
    }

    /// Oldest issue date first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by_key(|rm| (rm.issue_date, *rm.invoice_id.0.as_uuid()));
        all
    }

    /// Open invoices with a balance whose due date is before `as_of`, most
    /// overdue first.
    pub fn overdue(&self, tenant_id: TenantId, as_of: NaiveDate) -> Vec<OverdueInvoice> {
        let mut out: Vec<OverdueInvoice> = self
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.is_overdue(as_of))
            .map(|rm| OverdueInvoice {
                days_overdue: (as_of - rm.due_date).num_days(),
                invoice: rm,
            })
            .collect();
        out.sort_by(|a, b| b.days_overdue.cmp(&a.days_overdue));
        out
    }

    pub fn for_schedule(&self, tenant_id: TenantId, schedule_id: RecurringInvoiceId) -> Vec<InvoiceReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.source.is_some_and(|s| s.schedule_id == schedule_id))
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != INVOICE_AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: InvoiceEvent = decode(envelope)?;
        ensure_same_tenant(envelope, ev.tenant_id())?;
        let tenant_id = envelope.tenant_id();

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                if e.invoice_id.0 != envelope.aggregate_id() {
                    return Err(ProjectionError::TenantIsolation(
                        "event invoice_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.store.upsert(
                    tenant_id,
                    e.invoice_id,
                    InvoiceReadModel {
                        invoice_id: e.invoice_id,
                        customer: e.customer,
                        issue_date: e.issue_date,
                        due_date: e.due_date,
                        status: InvoiceStatus::Open,
                        total_amount: e.total_amount,
                        total_paid: 0,
                        outstanding: e.total_amount,
                        lines: e.lines,
                        source: e.source,
                        void_reason: None,
                    },
                );
            }
            InvoiceEvent::PaymentRegistered(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.invoice_id) {
                    rm.total_paid = e.new_total_paid;
                    rm.outstanding = rm.total_amount.saturating_sub(rm.total_paid);
                    if rm.outstanding == 0 {
                        rm.status = InvoiceStatus::Paid;
                    }
                    self.store.upsert(tenant_id, e.invoice_id, rm);
                }
            }
            InvoiceEvent::InvoiceVoided(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.invoice_id) {
                    rm.status = InvoiceStatus::Void;
                    rm.outstanding = 0;
                    rm.void_reason = e.reason;
                    self.store.upsert(tenant_id, e.invoice_id, rm);
                }
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let (tenants, envs) = replay_order(envelopes);
        for t in tenants {
            self.store.clear_tenant(t);
            self.cursors.clear_tenant(t);
        }
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
