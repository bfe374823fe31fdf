use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;

use keel_core::{AggregateId, TenantId, UserId};
use keel_events::EventEnvelope;
use keel_payroll::{PayPeriod, PayrollRunEvent, PayrollRunId, PayrollRunStatus, PayrollTotals, Payslip};

use crate::projections::cursor::{ProjectionError, StreamCursors, decode, ensure_same_tenant, replay_order};
use crate::read_model::TenantStore;

pub const PAYROLL_RUN_AGGREGATE_TYPE: &str = "payroll.run";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayrollRunReadModel {
    pub run_id: PayrollRunId,
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
    pub status: PayrollRunStatus,
    pub totals: PayrollTotals,
    pub payslips: Vec<Payslip>,
    pub approved_by: Option<UserId>,
    pub journal_entry_id: Option<AggregateId>,
    pub cancel_reason: Option<String>,
}

/// Payroll runs keyed by period (one run per tenant and month).
#[derive(Debug)]
pub struct PayrollRunsProjection<S>
where
    S: TenantStore<PayPeriod, PayrollRunReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PayrollRunsProjection<S>
where
    S: TenantStore<PayPeriod, PayrollRunReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, period: &PayPeriod) -> Option<PayrollRunReadModel> {
        self.store.get(tenant_id, period)
    }

    /// Latest period first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<PayrollRunReadModel> {
        let mut runs = self.store.list(tenant_id);
        runs.sort_by(|a, b| b.period.cmp(&a.period));
        runs
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PAYROLL_RUN_AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: PayrollRunEvent = decode(envelope)?;
        ensure_same_tenant(envelope, ev.tenant_id())?;
        let tenant_id = envelope.tenant_id();

        match ev {
            PayrollRunEvent::PayrollRunCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.period,
                    PayrollRunReadModel {
                        run_id: e.run_id,
                        period: e.period,
                        pay_date: e.pay_date,
                        status: PayrollRunStatus::Draft,
                        totals: PayrollTotals::default(),
                        payslips: vec![],
                        approved_by: None,
                        journal_entry_id: None,
                        cancel_reason: None,
                    },
                );
            }
            PayrollRunEvent::PayrollRunProcessed(e) => {
                self.update(tenant_id, e.run_id, |rm| {
                    rm.status = PayrollRunStatus::Processed;
                    rm.totals = e.totals;
                    rm.payslips = e.payslips;
                });
            }
            PayrollRunEvent::PayrollRunApproved(e) => {
                self.update(tenant_id, e.run_id, |rm| {
                    rm.status = PayrollRunStatus::Approved;
                    rm.approved_by = Some(e.approved_by);
                });
            }
            PayrollRunEvent::PayrollRunPosted(e) => {
                self.update(tenant_id, e.run_id, |rm| {
                    rm.status = PayrollRunStatus::Posted;
                    rm.journal_entry_id = Some(e.journal_entry_id);
                });
            }
            PayrollRunEvent::PayrollRunCancelled(e) => {
                self.update(tenant_id, e.run_id, |rm| {
                    rm.status = PayrollRunStatus::Cancelled;
                    rm.cancel_reason = e.reason;
                });
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn update(&self, tenant_id: TenantId, run_id: PayrollRunId, f: impl FnOnce(&mut PayrollRunReadModel)) {
        let existing = self
            .store
            .list(tenant_id)
            .into_iter()
            .find(|rm| rm.run_id == run_id);
        if let Some(mut rm) = existing {
            f(&mut rm);
            self.store.upsert(tenant_id, rm.period, rm);
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
