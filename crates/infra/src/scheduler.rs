//! Recurring invoice scheduler.
//!
//! For each schedule that is due, bills every pending run up to `as_of`:
//!
//! ```text
//! load schedule from the event store (authoritative)
//!   -> draft the invoice for the pending run
//!   -> IssueInvoice (id derived from schedule + run date)
//!   -> RecordInvoiceGenerated (advances the schedule)
//! ```
//!
//! A prorated run whose every line rounds to zero skips the issue step and is
//! recorded without an invoice, so the schedule keeps moving.
//!
//! Both steps are idempotent. Re-issuing an invoice that already exists is a
//! conflict and counts as skipped; recording a run that someone else already
//! recorded is a conflict and the schedule is simply reloaded. A crash between
//! the two steps is therefore repaired by the next pass.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use keel_core::TenantId;
use keel_events::{EventBus, EventEnvelope};
use keel_invoicing::{
    Invoice, InvoiceCommand, InvoiceId, RecordInvoiceGenerated, RecurringInvoice, RecurringInvoiceCommand,
    RecurringInvoiceId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::recurring_invoices::{
    RECURRING_AGGREGATE_TYPE, RecurringInvoiceReadModel, RecurringInvoicesProjection,
};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    /// Schedules that looked due.
    pub schedules: u32,
    /// Invoices issued by this pass.
    pub generated: u32,
    /// Runs whose invoice already existed.
    pub skipped: u32,
    /// Prorated runs that rounded to nothing and were recorded without an invoice.
    pub empty: u32,
    pub failed: u32,
    /// Schedules still due after `max_catch_up` runs.
    pub deferred: u32,
}

impl SchedulerReport {
    fn merge(&mut self, other: SchedulerReport) {
        self.schedules += other.schedules;
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.empty += other.empty;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }
}

pub struct RecurringScheduler<S, B, R>
where
    R: TenantStore<RecurringInvoiceId, RecurringInvoiceReadModel>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    schedules: Arc<RecurringInvoicesProjection<R>>,
    max_catch_up: u32,
}

impl<S, B, R> RecurringScheduler<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: TenantStore<RecurringInvoiceId, RecurringInvoiceReadModel>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        schedules: Arc<RecurringInvoicesProjection<R>>,
        max_catch_up: u32,
    ) -> Self {
        Self {
            dispatcher,
            schedules,
            max_catch_up: max_catch_up.max(1),
        }
    }

    /// Tenants that have at least one schedule.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.schedules.tenants()
    }

    pub fn run_due(&self, tenant_id: TenantId, as_of: NaiveDate, now: DateTime<Utc>) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        for candidate in self.schedules.due(tenant_id, as_of) {
            report.schedules += 1;
            report.merge(self.run_schedule(tenant_id, candidate.schedule_id, as_of, now));
        }

        if report.schedules > 0 {
            info!(
                tenant_id = %tenant_id,
                as_of = %as_of,
                schedules = report.schedules,
                generated = report.generated,
                skipped = report.skipped,
                empty = report.empty,
                failed = report.failed,
                deferred = report.deferred,
                "recurring invoice pass finished"
            );
        }
        report
    }

    /// Every tenant known to the schedule read model.
    pub fn run_all(&self, as_of: NaiveDate, now: DateTime<Utc>) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        for tenant_id in self.tenants() {
            report.merge(self.run_due(tenant_id, as_of, now));
        }
        report
    }

    fn run_schedule(
        &self,
        tenant_id: TenantId,
        schedule_id: RecurringInvoiceId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> SchedulerReport {
        let mut report = SchedulerReport::default();

        for _ in 0..self.max_catch_up {
            let schedule = match self.load(tenant_id, schedule_id) {
                Ok(s) => s,
                Err(err) => {
                    warn!(tenant_id = %tenant_id, schedule_id = %schedule_id, error = %err, "failed to load schedule");
                    report.failed += 1;
                    return report;
                }
            };
            let Some(run) = schedule.due_run(as_of) else {
                return report;
            };

            let draft = match schedule.draft_invoice(&run, now) {
                Ok(d) => d,
                Err(err) => {
                    warn!(tenant_id = %tenant_id, schedule_id = %schedule_id, error = %err, "failed to draft invoice");
                    report.failed += 1;
                    return report;
                }
            };

            let invoice_id = match draft {
                Some(draft) => {
                    let invoice_id = draft.invoice_id;
                    let issued = self.dispatcher.dispatch(
                        tenant_id,
                        invoice_id.0,
                        INVOICE_AGGREGATE_TYPE,
                        InvoiceCommand::IssueInvoice(draft),
                        |_, id| Invoice::empty(InvoiceId::new(id)),
                    );
                    match issued {
                        Ok(_) => report.generated += 1,
                        Err(err) if err.is_conflict() => report.skipped += 1,
                        Err(err) => {
                            warn!(
                                tenant_id = %tenant_id,
                                schedule_id = %schedule_id,
                                run_date = %run.run_date,
                                error = %err,
                                "failed to issue recurring invoice"
                            );
                            report.failed += 1;
                            return report;
                        }
                    }
                    Some(invoice_id)
                }
                None => {
                    debug!(
                        tenant_id = %tenant_id,
                        schedule_id = %schedule_id,
                        run_date = %run.run_date,
                        "prorated run rounds to zero, no invoice issued"
                    );
                    report.empty += 1;
                    None
                }
            };

            let recorded = self.dispatcher.dispatch(
                tenant_id,
                schedule_id.0,
                RECURRING_AGGREGATE_TYPE,
                RecurringInvoiceCommand::RecordInvoiceGenerated(RecordInvoiceGenerated {
                    tenant_id,
                    schedule_id,
                    run_date: run.run_date,
                    invoice_id,
                    occurred_at: now,
                }),
                |_, id| RecurringInvoice::empty(RecurringInvoiceId::new(id)),
            );
            match recorded {
                Ok(_) => {}
                Err(err) if err.is_conflict() => {}
                Err(err) => {
                    warn!(
                        tenant_id = %tenant_id,
                        schedule_id = %schedule_id,
                        run_date = %run.run_date,
                        error = %err,
                        "failed to record generated invoice"
                    );
                    report.failed += 1;
                    return report;
                }
            }
        }

        if let Ok(schedule) = self.load(tenant_id, schedule_id) {
            if schedule.due_run(as_of).is_some() {
                report.deferred += 1;
            }
        }
        report
    }

    fn load(&self, tenant_id: TenantId, schedule_id: RecurringInvoiceId) -> Result<RecurringInvoice, DispatchError> {
        self.dispatcher.load(tenant_id, schedule_id.0, |_, id| {
            RecurringInvoice::empty(RecurringInvoiceId::new(id))
        })
    }
}
