use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;

use keel_core::TenantId;
use keel_events::EventEnvelope;
use keel_invoicing::{
    BillingRun, CustomerRef, InvoiceId, InvoiceLine, RecurrenceRule, RecurringInvoiceEvent,
    RecurringInvoiceId, RecurringStatus,
};

use crate::projections::cursor::{ProjectionError, StreamCursors, decode, ensure_same_tenant, replay_order};
use crate::read_model::TenantStore;

pub const RECURRING_AGGREGATE_TYPE: &str = "invoicing.recurring";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringInvoiceReadModel {
    pub schedule_id: RecurringInvoiceId,
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub rule: RecurrenceRule,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payment_terms_days: u32,
    pub prorate: bool,
    pub status: RecurringStatus,
    pub next_run: Option<BillingRun>,
    pub generated_count: u32,
    pub skipped_runs: u32,
    pub last_invoice_id: Option<InvoiceId>,
}

impl RecurringInvoiceReadModel {
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.status == RecurringStatus::Active && self.next_run.is_some_and(|r| r.run_date <= as_of)
    }
}

#[derive(Debug)]
pub struct RecurringInvoicesProjection<S>
where
    S: TenantStore<RecurringInvoiceId, RecurringInvoiceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> RecurringInvoicesProjection<S>
where
    S: TenantStore<RecurringInvoiceId, RecurringInvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, schedule_id: &RecurringInvoiceId) -> Option<RecurringInvoiceReadModel> {
        self.store.get(tenant_id, schedule_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<RecurringInvoiceReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by_key(|rm| (rm.start_date, *rm.schedule_id.0.as_uuid()));
        all
    }

    /// Active schedules whose pending run is on or before `as_of`, earliest
    /// run first.
    ///
    /// A hint for the scheduler only; it re-reads each schedule from the
    /// event store before billing.
    pub fn due(&self, tenant_id: TenantId, as_of: NaiveDate) -> Vec<RecurringInvoiceReadModel> {
        let mut due: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.is_due(as_of))
            .collect();
        due.sort_by_key(|rm| (rm.next_run.map(|r| r.run_date), *rm.schedule_id.0.as_uuid()));
        due
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.store.tenants()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != RECURRING_AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: RecurringInvoiceEvent = decode(envelope)?;
        ensure_same_tenant(envelope, ev.tenant_id())?;
        let tenant_id = envelope.tenant_id();

        match ev {
            RecurringInvoiceEvent::RecurringInvoiceCreated(e) => {
                if e.schedule_id.0 != envelope.aggregate_id() {
                    return Err(ProjectionError::TenantIsolation(
                        "event schedule_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.store.upsert(
                    tenant_id,
                    e.schedule_id,
                    RecurringInvoiceReadModel {
                        schedule_id: e.schedule_id,
                        customer: e.customer,
                        lines: e.lines,
                        rule: e.rule,
                        start_date: e.start_date,
                        end_date: e.end_date,
                        payment_terms_days: e.payment_terms_days,
                        prorate: e.prorate,
                        status: RecurringStatus::Active,
                        next_run: Some(e.first_run),
                        generated_count: 0,
                        skipped_runs: 0,
                        last_invoice_id: None,
                    },
                );
            }
            RecurringInvoiceEvent::InvoiceGenerated(e) => {
                self.update(tenant_id, &e.schedule_id, |rm| {
                    rm.generated_count += 1;
                    if e.invoice_id.is_some() {
                        rm.last_invoice_id = e.invoice_id;
                    }
                    rm.next_run = e.next_run;
                });
            }
            RecurringInvoiceEvent::RecurringInvoicePaused(e) => {
                self.update(tenant_id, &e.schedule_id, |rm| rm.status = RecurringStatus::Paused);
            }
            RecurringInvoiceEvent::RecurringInvoiceResumed(e) => {
                self.update(tenant_id, &e.schedule_id, |rm| {
                    rm.status = RecurringStatus::Active;
                    rm.skipped_runs += e.skipped_runs;
                    rm.next_run = e.next_run;
                });
            }
            RecurringInvoiceEvent::RecurringInvoiceCancelled(e) => {
                self.update(tenant_id, &e.schedule_id, |rm| {
                    rm.status = RecurringStatus::Cancelled;
                    rm.next_run = None;
                });
            }
            RecurringInvoiceEvent::RecurringInvoiceCompleted(e) => {
                self.update(tenant_id, &e.schedule_id, |rm| {
                    rm.status = RecurringStatus::Completed;
                    rm.next_run = None;
                });
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn update(
        &self,
        tenant_id: TenantId,
        schedule_id: &RecurringInvoiceId,
        f: impl FnOnce(&mut RecurringInvoiceReadModel),
    ) {
        if let Some(mut rm) = self.store.get(tenant_id, schedule_id) {
            f(&mut rm);
            self.store.upsert(tenant_id, *schedule_id, rm);
        }
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
