use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use keel_accounting::{AccountKind, JournalEntryLine, JournalSource, LedgerEvent};
use keel_core::TenantId;
use keel_events::EventEnvelope;

use crate::projections::cursor::{ProjectionError, StreamCursors, decode, ensure_same_tenant, replay_order};
use crate::read_model::TenantStore;

pub const LEDGER_AGGREGATE_TYPE: &str = "accounting.ledger";

/// Running totals of one account. `balance` is debit-positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debit_total: u128,
    pub credit_total: u128,
    pub balance: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntryReadModel {
    pub entry_id: Uuid,
    pub entry_date: NaiveDate,
    pub description: Option<String>,
    pub source: Option<JournalSource>,
    pub lines: Vec<JournalEntryLine>,
    pub total: u64,
    pub reversal_of: Option<Uuid>,
    pub reversed_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalanceLine {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debit: u128,
    pub credit: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalance {
    pub lines: Vec<TrialBalanceLine>,
    pub total_debits: u128,
    pub total_credits: u128,
    pub balanced: bool,
}

/// Projection: ledger events -> account balances and the journal.
#[derive(Debug)]
pub struct LedgerProjection<B, E>
where
    B: TenantStore<String, AccountBalance>,
    E: TenantStore<Uuid, JournalEntryReadModel>,
{
    balances: B,
    entries: E,
    cursors: StreamCursors,
}

impl<B, E> LedgerProjection<B, E>
where
    B: TenantStore<String, AccountBalance>,
    E: TenantStore<Uuid, JournalEntryReadModel>,
{
    pub fn new(balances: B, entries: E) -> Self {
        Self {
            balances,
            entries,
            cursors: StreamCursors::new(),
        }
    }

    pub fn balance(&self, tenant_id: TenantId, account_code: &str) -> Option<AccountBalance> {
        self.balances.get(tenant_id, &account_code.to_string())
    }

    /// Sorted by account code.
    pub fn balances(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        let mut all = self.balances.list(tenant_id);
        all.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        all
    }

    pub fn entry(&self, tenant_id: TenantId, entry_id: Uuid) -> Option<JournalEntryReadModel> {
        self.entries.get(tenant_id, &entry_id)
    }

    /// Journal in date order; entries of one day keep posting order.
    pub fn entries(&self, tenant_id: TenantId) -> Vec<JournalEntryReadModel> {
        let mut all = self.entries.list(tenant_id);
        all.sort_by_key(|e| (e.entry_date, e.entry_id));
        all
    }

    pub fn trial_balance(&self, tenant_id: TenantId) -> TrialBalance {
        let lines: Vec<TrialBalanceLine> = self
            .balances(tenant_id)
            .into_iter()
            .map(|b| TrialBalanceLine {
                debit: if b.balance > 0 { b.balance.unsigned_abs() } else { 0 },
                credit: if b.balance < 0 { b.balance.unsigned_abs() } else { 0 },
                account_code: b.account_code,
                account_name: b.account_name,
                kind: b.kind,
            })
            .collect();
        let total_debits = lines.iter().map(|l| l.debit).sum();
        let total_credits = lines.iter().map(|l| l.credit).sum();
        TrialBalance {
            lines,
            total_debits,
            total_credits,
            balanced: total_debits == total_credits,
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != LEDGER_AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: LedgerEvent = decode(envelope)?;
        ensure_same_tenant(envelope, ev.tenant_id())?;
        let tenant_id = envelope.tenant_id();

        for line in ev.lines() {
            self.apply_line(tenant_id, line);
        }

        match ev {
            LedgerEvent::JournalEntryPosted(e) => {
                let total = debit_total(&e.lines);
                self.entries.upsert(
                    tenant_id,
                    e.entry_id,
                    JournalEntryReadModel {
                        entry_id: e.entry_id,
                        entry_date: e.entry_date,
                        description: e.description,
                        source: e.source,
                        lines: e.lines,
                        total,
                        reversal_of: None,
                        reversed_by: None,
                    },
                );
            }
            LedgerEvent::JournalEntryReversed(e) => {
                if let Some(mut original) = self.entries.get(tenant_id, &e.reversed_entry_id) {
                    original.reversed_by = Some(e.reversal_entry_id);
                    self.entries.upsert(tenant_id, e.reversed_entry_id, original);
                }
                let total = debit_total(&e.lines);
                self.entries.upsert(
                    tenant_id,
                    e.reversal_entry_id,
                    JournalEntryReadModel {
                        entry_id: e.reversal_entry_id,
                        entry_date: e.entry_date,
                        description: e.reason,
                        source: None,
                        lines: e.lines,
                        total,
                        reversal_of: Some(e.reversed_entry_id),
                        reversed_by: None,
                    },
                );
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn apply_line(&self, tenant_id: TenantId, line: &JournalEntryLine) {
        let code = line.account.code.clone();
        let mut bal = self.balances.get(tenant_id, &code).unwrap_or(AccountBalance {
            account_code: code.clone(),
            account_name: line.account.name.clone(),
            kind: line.account.kind,
            debit_total: 0,
            credit_total: 0,
            balance: 0,
        });
        if line.is_debit {
            bal.debit_total += u128::from(line.amount);
        } else {
            bal.credit_total += u128::from(line.amount);
        }
        bal.balance += line.signed_amount();
        self.balances.upsert(tenant_id, code, bal);
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let (tenants, envs) = replay_order(envelopes);
        for t in tenants {
            self.balances.clear_tenant(t);
            self.entries.clear_tenant(t);
            self.cursors.clear_tenant(t);
        }
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

fn debit_total(lines: &[JournalEntryLine]) -> u64 {
    lines
        .iter()
        .filter(|l| l.is_debit)
        .fold(0u64, |acc, l| acc.saturating_add(l.amount))
}
