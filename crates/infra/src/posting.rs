//! Automatic ledger postings for billing and payroll.
//!
//! Reacts to committed envelopes and turns business facts into journal
//! entries on the tenant's ledger:
//!
//! | event | entry |
//! |---|---|
//! | `invoicing.invoice.issued` | Dr receivables / Cr revenue |
//! | `invoicing.invoice.payment_registered` | Dr cash / Cr receivables |
//! | `invoicing.invoice.voided` | reversal of the issue entry |
//! | `payroll.run.approved` | Dr salary expense / Cr tax, insurance, salaries payable |
//!
//! Entry ids are derived from the source (document id for one-shot facts,
//! event id for payments), so a redelivered envelope collides with the entry
//! it already produced and is reported as [`PostingOutcome::AlreadyPosted`].

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use keel_accounting::{
    ChartOfAccounts, JournalCommand, JournalEntryLine, JournalSource, Ledger, LedgerId, PostJournalEntry,
    ReverseJournalEntry,
};
use keel_core::{AggregateId, TenantId};
use keel_events::{EventBus, EventEnvelope};
use keel_invoicing::{Invoice, InvoiceEvent, InvoiceId};
use keel_payroll::{MarkPayrollRunPosted, PayrollRun, PayrollRunCommand, PayrollRunEvent, PayrollRunId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::ledger::LEDGER_AGGREGATE_TYPE;
use crate::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE;

const LEDGER_RETRY_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum PostingError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingOutcome {
    Posted(Uuid),
    AlreadyPosted(Uuid),
    /// Not a posting event.
    Ignored,
}

/// Deterministic journal entry id for a posting source.
pub fn entry_id_for(tenant_id: TenantId, key: &str) -> Uuid {
    *AggregateId::derived(tenant_id, "accounting.entry", key).as_uuid()
}

pub fn invoice_entry_id(tenant_id: TenantId, invoice_id: InvoiceId) -> Uuid {
    entry_id_for(tenant_id, &format!("invoicing.invoice.issued:{invoice_id}"))
}

pub fn payroll_entry_id(tenant_id: TenantId, run_id: PayrollRunId) -> Uuid {
    entry_id_for(tenant_id, &format!("payroll.run.approved:{}", run_id.0))
}

pub struct PostingProcessor<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    chart: ChartOfAccounts,
}

impl<S, B> PostingProcessor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, chart: ChartOfAccounts) -> Self {
        Self { dispatcher, chart }
    }

    pub fn chart(&self) -> &ChartOfAccounts {
        &self.chart
    }

    pub fn handle_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<PostingOutcome, PostingError> {
        match envelope.aggregate_type() {
            INVOICE_AGGREGATE_TYPE => self.handle_invoice(envelope),
            PAYROLL_RUN_AGGREGATE_TYPE => self.handle_payroll(envelope),
            _ => Ok(PostingOutcome::Ignored),
        }
    }

    fn handle_invoice(&self, envelope: &EventEnvelope<JsonValue>) -> Result<PostingOutcome, PostingError> {
        let tenant_id = envelope.tenant_id();
        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PostingError::Deserialize(e.to_string()))?;

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                let entry_id = invoice_entry_id(tenant_id, e.invoice_id);
                self.post(PostJournalEntry {
                    tenant_id,
                    ledger_id: LedgerId::for_tenant(tenant_id),
                    entry_id,
                    entry_date: e.issue_date,
                    lines: vec![
                        JournalEntryLine::debit(&self.chart.receivables, e.total_amount),
                        JournalEntryLine::credit(&self.chart.revenue, e.total_amount),
                    ],
                    description: Some(format!("Invoice issued to {}", e.customer.name)),
                    source: Some(JournalSource {
                        source_type: envelope.event_type().to_string(),
                        source_id: *e.invoice_id.0.as_uuid(),
                    }),
                    occurred_at: e.occurred_at,
                })
            }
            InvoiceEvent::PaymentRegistered(e) => {
                let entry_id = entry_id_for(
                    tenant_id,
                    &format!("{}:{}", envelope.event_type(), envelope.event_id()),
                );
                self.post(PostJournalEntry {
                    tenant_id,
                    ledger_id: LedgerId::for_tenant(tenant_id),
                    entry_id,
                    entry_date: e.paid_on,
                    lines: vec![
                        JournalEntryLine::debit(&self.chart.cash, e.amount),
                        JournalEntryLine::credit(&self.chart.receivables, e.amount),
                    ],
                    description: Some("Payment received".to_string()),
                    source: Some(JournalSource {
                        source_type: envelope.event_type().to_string(),
                        source_id: *e.invoice_id.0.as_uuid(),
                    }),
                    occurred_at: e.occurred_at,
                })
            }
            InvoiceEvent::InvoiceVoided(e) => {
                let invoice: Invoice = self.dispatcher.load(tenant_id, e.invoice_id.0, |_, id| {
                    Invoice::empty(InvoiceId::new(id))
                })?;
                let voided_on = e.occurred_at.date_naive();
                let reversal_date = invoice.issue_date().map_or(voided_on, |issued| issued.max(voided_on));

                let reversal_entry_id =
                    entry_id_for(tenant_id, &format!("invoicing.invoice.voided:{}", e.invoice_id));
                self.reverse(ReverseJournalEntry {
                    tenant_id,
                    ledger_id: LedgerId::for_tenant(tenant_id),
                    entry_id: invoice_entry_id(tenant_id, e.invoice_id),
                    reversal_entry_id,
                    reversal_date,
                    reason: Some(e.reason.unwrap_or_else(|| "invoice voided".to_string())),
                    occurred_at: e.occurred_at,
                })
            }
        }
    }

    fn handle_payroll(&self, envelope: &EventEnvelope<JsonValue>) -> Result<PostingOutcome, PostingError> {
        let tenant_id = envelope.tenant_id();
        let ev: PayrollRunEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PostingError::Deserialize(e.to_string()))?;
        let PayrollRunEvent::PayrollRunApproved(e) = ev else {
            return Ok(PostingOutcome::Ignored);
        };

        let entry_id = payroll_entry_id(tenant_id, e.run_id);
        let lines = payroll_lines(&self.chart, e.totals.gross, e.totals.income_tax, e.totals.social_insurance, e.totals.net);
        if lines.len() < 2 {
            debug!(tenant_id = %tenant_id, period = %e.period, "payroll run has nothing to post");
            return Ok(PostingOutcome::Ignored);
        }

        let outcome = self.post(PostJournalEntry {
            tenant_id,
            ledger_id: LedgerId::for_tenant(tenant_id),
            entry_id,
            entry_date: e.pay_date,
            lines,
            description: Some(format!("Payroll {}", e.period)),
            source: Some(JournalSource {
                source_type: envelope.event_type().to_string(),
                source_id: *e.run_id.0.as_uuid(),
            }),
            occurred_at: e.occurred_at,
        })?;

        let marked = self.dispatcher.dispatch(
            tenant_id,
            e.run_id.0,
            PAYROLL_RUN_AGGREGATE_TYPE,
            PayrollRunCommand::MarkPayrollRunPosted(MarkPayrollRunPosted {
                tenant_id,
                run_id: e.run_id,
                journal_entry_id: AggregateId::from_uuid(entry_id),
                occurred_at: e.occurred_at,
            }),
            |_, id| PayrollRun::empty(PayrollRunId::new(id)),
        );
        match marked {
            Ok(_) => Ok(outcome),
            Err(DispatchError::Conflict(_)) => Ok(PostingOutcome::AlreadyPosted(entry_id)),
            Err(err) => Err(err.into()),
        }
    }

    fn post(&self, cmd: PostJournalEntry) -> Result<PostingOutcome, PostingError> {
        let (tenant_id, entry_id, entry_date) = (cmd.tenant_id, cmd.entry_id, cmd.entry_date);
        let result = self.dispatch_ledger(tenant_id, JournalCommand::PostJournalEntry(cmd));
        settle(result, tenant_id, entry_id, entry_date)
    }

    fn reverse(&self, cmd: ReverseJournalEntry) -> Result<PostingOutcome, PostingError> {
        let (tenant_id, entry_id, entry_date) = (cmd.tenant_id, cmd.reversal_entry_id, cmd.reversal_date);
        let result = self.dispatch_ledger(tenant_id, JournalCommand::ReverseJournalEntry(cmd));
        settle(result, tenant_id, entry_id, entry_date)
    }

    fn dispatch_ledger(&self, tenant_id: TenantId, cmd: JournalCommand) -> Result<(), DispatchError> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        self.dispatcher
            .dispatch_with_retry(
                tenant_id,
                ledger_id.0,
                LEDGER_AGGREGATE_TYPE,
                cmd,
                |_, id| Ledger::empty(LedgerId::new(id)),
                LEDGER_RETRY_ATTEMPTS,
            )
            .map(|_| ())
    }
}

fn settle(
    result: Result<(), DispatchError>,
    tenant_id: TenantId,
    entry_id: Uuid,
    entry_date: NaiveDate,
) -> Result<PostingOutcome, PostingError> {
    match result {
        Ok(()) => {
            info!(tenant_id = %tenant_id, entry_id = %entry_id, entry_date = %entry_date, "journal entry posted");
            Ok(PostingOutcome::Posted(entry_id))
        }
        Err(DispatchError::Conflict(_)) => {
            debug!(tenant_id = %tenant_id, entry_id = %entry_id, "journal entry already posted");
            Ok(PostingOutcome::AlreadyPosted(entry_id))
        }
        Err(err) => Err(err.into()),
    }
}

/// Payroll journal lines, leaving out zero amounts.
fn payroll_lines(
    chart: &ChartOfAccounts,
    gross: u64,
    income_tax: u64,
    social_insurance: u64,
    net: u64,
) -> Vec<JournalEntryLine> {
    let candidates = [
        (gross, JournalEntryLine::debit(&chart.salary_expense, gross)),
        (income_tax, JournalEntryLine::credit(&chart.income_tax_payable, income_tax)),
        (social_insurance, JournalEntryLine::credit(&chart.social_insurance_payable, social_insurance)),
        (net, JournalEntryLine::credit(&chart.salaries_payable, net)),
    ];
    candidates
        .into_iter()
        .filter(|(amount, _)| *amount > 0)
        .map(|(_, line)| line)
        .collect()
}
