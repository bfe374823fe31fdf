use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use keel_events::Event;

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    /// Assets and expenses grow with debits; the rest grow with credits.
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

/// One side of a journal entry (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    pub account: Account,
    /// Positive amount in cents.
    pub amount: u64,
    /// true = debit, false = credit.
    pub is_debit: bool,
}

impl JournalEntryLine {
    pub fn debit(account: &Account, amount: u64) -> Self {
        Self {
            account: account.clone(),
            amount,
            is_debit: true,
        }
    }

    pub fn credit(account: &Account, amount: u64) -> Self {
        Self {
            account: account.clone(),
            amount,
            is_debit: false,
        }
    }

    /// Debit positive, credit negative.
    pub fn signed_amount(&self) -> i128 {
        if self.is_debit {
            i128::from(self.amount)
        } else {
            -i128::from(self.amount)
        }
    }

    fn swapped(&self) -> Self {
        Self {
            account: self.account.clone(),
            amount: self.amount,
            is_debit: !self.is_debit,
        }
    }
}

/// Business document a journal entry was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalSource {
    /// Event type of the originating fact (e.g. `invoicing.invoice.issued`).
    pub source_type: String,
    pub source_id: Uuid,
}

/// Ledger identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Each tenant books into a single general ledger.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::derived(tenant_id, "accounting.ledger", "general"))
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryRecord {
    entry_date: NaiveDate,
    lines: Vec<JournalEntryLine>,
    reverses: Option<Uuid>,
    reversed_by: Option<Uuid>,
}

/// Aggregate root: Ledger (double-entry journal).
///
/// Holds only what the command rules need (which entries exist and how they
/// relate). Balances are derived by projections over the ledger events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    tenant_id: Option<TenantId>,
    entries: HashMap<Uuid, EntryRecord>,
    version: u64,
    created: bool,
}

impl Ledger {
    /// Empty aggregate for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            entries: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_entry(&self, entry_id: Uuid) -> bool {
        self.entries.contains_key(&entry_id)
    }

    pub fn is_reversed(&self, entry_id: Uuid) -> bool {
        self.entries
            .get(&entry_id)
            .is_some_and(|e| e.reversed_by.is_some())
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: Uuid,
    pub entry_date: NaiveDate,
    pub lines: Vec<JournalEntryLine>,
    pub description: Option<String>,
    pub source: Option<JournalSource>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    /// Entry being reversed.
    pub entry_id: Uuid,
    pub reversal_entry_id: Uuid,
    pub reversal_date: NaiveDate,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    PostJournalEntry(PostJournalEntry),
    ReverseJournalEntry(ReverseJournalEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: Uuid,
    pub entry_date: NaiveDate,
    pub lines: Vec<JournalEntryLine>,
    pub description: Option<String>,
    pub source: Option<JournalSource>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryReversed {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub reversal_entry_id: Uuid,
    pub reversed_entry_id: Uuid,
    pub entry_date: NaiveDate,
    /// Original lines with debit and credit swapped.
    pub lines: Vec<JournalEntryLine>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    JournalEntryPosted(JournalEntryPosted),
    JournalEntryReversed(JournalEntryReversed),
}

impl LedgerEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            LedgerEvent::JournalEntryPosted(e) => e.tenant_id,
            LedgerEvent::JournalEntryReversed(e) => e.tenant_id,
        }
    }

    pub fn lines(&self) -> &[JournalEntryLine] {
        match self {
            LedgerEvent::JournalEntryPosted(e) => &e.lines,
            LedgerEvent::JournalEntryReversed(e) => &e.lines,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::JournalEntryPosted(_) => "accounting.ledger.journal_entry_posted",
            LedgerEvent::JournalEntryReversed(_) => "accounting.ledger.journal_entry_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::JournalEntryPosted(e) => e.occurred_at,
            LedgerEvent::JournalEntryReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = JournalCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::JournalEntryPosted(e) => {
                self.id = e.ledger_id;
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                    self.created = true;
                }
                self.entries.insert(
                    e.entry_id,
                    EntryRecord {
                        entry_date: e.entry_date,
                        lines: e.lines.clone(),
                        reverses: None,
                        reversed_by: None,
                    },
                );
            }
            LedgerEvent::JournalEntryReversed(e) => {
                if let Some(original) = self.entries.get_mut(&e.reversed_entry_id) {
                    original.reversed_by = Some(e.reversal_entry_id);
                }
                self.entries.insert(
                    e.reversal_entry_id,
                    EntryRecord {
                        entry_date: e.entry_date,
                        lines: e.lines.clone(),
                        reverses: Some(e.reversed_entry_id),
                        reversed_by: None,
                    },
                );
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::PostJournalEntry(cmd) => self.handle_post(cmd),
            JournalCommand::ReverseJournalEntry(cmd) => self.handle_reverse(cmd),
        }
    }
}

impl Ledger {
    fn ensure_tenant(&self, tenant_id: TenantId, ledger_id: LedgerId) -> Result<(), DomainError> {
        if ledger_id != self.id {
            return Err(DomainError::invariant("ledger_id mismatch"));
        }
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_post(&self, cmd: &PostJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id, cmd.ledger_id)?;

        if self.entries.contains_key(&cmd.entry_id) {
            return Err(DomainError::conflict(format!(
                "journal entry {} already posted",
                cmd.entry_id
            )));
        }
        if cmd.lines.len() < 2 {
            return Err(DomainError::validation("journal entry needs at least two lines"));
        }

        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;

        for line in &cmd.lines {
            if line.amount == 0 {
                return Err(DomainError::validation("amount must be positive"));
            }
            if line.account.code.trim().is_empty() {
                return Err(DomainError::validation("account code cannot be empty"));
            }
            if line.is_debit {
                debit_total += i128::from(line.amount);
            } else {
                credit_total += i128::from(line.amount);
            }
        }

        if debit_total != credit_total {
            return Err(DomainError::invariant("debits must equal credits"));
        }

        Ok(vec![LedgerEvent::JournalEntryPosted(JournalEntryPosted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry_id: cmd.entry_id,
            entry_date: cmd.entry_date,
            lines: cmd.lines.clone(),
            description: cmd.description.clone(),
            source: cmd.source.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id, cmd.ledger_id)?;

        let original = self.entries.get(&cmd.entry_id).ok_or_else(DomainError::not_found)?;
        if original.reverses.is_some() {
            return Err(DomainError::invariant("a reversal entry cannot be reversed"));
        }
        if original.reversed_by.is_some() {
            return Err(DomainError::conflict(format!(
                "journal entry {} is already reversed",
                cmd.entry_id
            )));
        }
        if self.entries.contains_key(&cmd.reversal_entry_id) {
            return Err(DomainError::conflict(format!(
                "journal entry {} already posted",
                cmd.reversal_entry_id
            )));
        }
        if cmd.reversal_date < original.entry_date {
            return Err(DomainError::validation(
                "reversal_date cannot precede the original entry date",
            ));
        }

        Ok(vec![LedgerEvent::JournalEntryReversed(JournalEntryReversed {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            reversal_entry_id: cmd.reversal_entry_id,
            reversed_entry_id: cmd.entry_id,
            entry_date: cmd.reversal_date,
            lines: original.lines.iter().map(JournalEntryLine::swapped).collect(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_events::execute;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_account(code: &str, kind: AccountKind) -> Account {
        Account {
            code: code.to_string(),
            name: code.to_string(),
            kind,
        }
    }

    fn balanced_lines(amount: u64) -> Vec<JournalEntryLine> {
        vec![
            JournalEntryLine::debit(&test_account("1000", AccountKind::Asset), amount),
            JournalEntryLine::credit(&test_account("2000", AccountKind::Liability), amount),
        ]
    }

    fn post_cmd(tenant_id: TenantId, ledger_id: LedgerId, lines: Vec<JournalEntryLine>) -> PostJournalEntry {
        PostJournalEntry {
            tenant_id,
            ledger_id,
            entry_id: Uuid::now_v7(),
            entry_date: d(2024, 3, 31),
            lines,
            description: Some("Test entry".to_string()),
            source: None,
            occurred_at: test_time(),
        }
    }

    fn reverse_cmd(tenant_id: TenantId, ledger_id: LedgerId, entry_id: Uuid) -> ReverseJournalEntry {
        ReverseJournalEntry {
            tenant_id,
            ledger_id,
            entry_id,
            reversal_entry_id: Uuid::now_v7(),
            reversal_date: d(2024, 4, 1),
            reason: Some("Posted in error".into()),
            occurred_at: test_time(),
        }
    }

    fn ledger_with_entry(tenant_id: TenantId) -> (Ledger, Uuid) {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let mut ledger = Ledger::empty(ledger_id);
        let cmd = post_cmd(tenant_id, ledger_id, balanced_lines(100));
        let entry_id = cmd.entry_id;
        execute(&mut ledger, &JournalCommand::PostJournalEntry(cmd)).unwrap();
        (ledger, entry_id)
    }

    #[test]
    fn post_journal_entry_emits_event_when_balanced() {
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let ledger = Ledger::empty(ledger_id);
        let lines = balanced_lines(100);

        let events = ledger
            .handle(&JournalCommand::PostJournalEntry(post_cmd(tenant_id, ledger_id, lines.clone())))
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LedgerEvent::JournalEntryPosted(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.ledger_id, ledger_id);
                assert_eq!(e.lines, lines);
            }
            other => panic!("Expected JournalEntryPosted, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let ledger = Ledger::empty(ledger_id);

        let lines = vec![
            JournalEntryLine::debit(&test_account("1000", AccountKind::Asset), 100),
            JournalEntryLine::credit(&test_account("2000", AccountKind::Liability), 90),
        ];

        let err = ledger
            .handle(&JournalCommand::PostJournalEntry(post_cmd(tenant_id, ledger_id, lines)))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("debits must equal credits") => {}
            _ => panic!("Expected invariant violation for unbalanced entry"),
        }
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let ledger = Ledger::empty(ledger_id);

        let single = vec![JournalEntryLine::debit(&test_account("1000", AccountKind::Asset), 1)];
        let zero = balanced_lines(0);
        let blank = vec![
            JournalEntryLine::debit(&test_account(" ", AccountKind::Asset), 5),
            JournalEntryLine::credit(&test_account("2000", AccountKind::Liability), 5),
        ];

        for lines in [single, zero, blank] {
            let err = ledger
                .handle(&JournalCommand::PostJournalEntry(post_cmd(tenant_id, ledger_id, lines)))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
        }
    }

    #[test]
    fn duplicate_entry_id_is_a_conflict() {
        let tenant_id = TenantId::new();
        let (ledger, entry_id) = ledger_with_entry(tenant_id);
        let mut cmd = post_cmd(tenant_id, ledger.id_typed(), balanced_lines(5));
        cmd.entry_id = entry_id;
        let err = ledger.handle(&JournalCommand::PostJournalEntry(cmd)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn other_tenant_cannot_post_into_ledger() {
        let (ledger, _) = ledger_with_entry(TenantId::new());
        let cmd = post_cmd(TenantId::new(), ledger.id_typed(), balanced_lines(5));
        let err = ledger.handle(&JournalCommand::PostJournalEntry(cmd)).unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }

    #[test]
    fn reversal_swaps_sides_and_nets_to_zero() {
        let tenant_id = TenantId::new();
        let (mut ledger, entry_id) = ledger_with_entry(tenant_id);

        let cmd = JournalCommand::ReverseJournalEntry(reverse_cmd(tenant_id, ledger.id_typed(), entry_id));
        let events = execute(&mut ledger, &cmd).unwrap();
        match &events[0] {
            LedgerEvent::JournalEntryReversed(e) => {
                assert_eq!(e.reversed_entry_id, entry_id);
                assert!(e.lines[0].account.code == "1000" && !e.lines[0].is_debit);
                assert!(e.lines[1].account.code == "2000" && e.lines[1].is_debit);
            }
            other => panic!("Expected JournalEntryReversed, got {other:?}"),
        }
        assert!(ledger.is_reversed(entry_id));
        assert_eq!(ledger.entry_count(), 2);
    }

    #[test]
    fn reversal_rules() {
        let tenant_id = TenantId::new();
        let (mut ledger, entry_id) = ledger_with_entry(tenant_id);
        let ledger_id = ledger.id_typed();

        let unknown = reverse_cmd(tenant_id, ledger_id, Uuid::now_v7());
        assert_eq!(
            ledger.handle(&JournalCommand::ReverseJournalEntry(unknown)).unwrap_err(),
            DomainError::NotFound
        );

        let mut early = reverse_cmd(tenant_id, ledger_id, entry_id);
        early.reversal_date = d(2024, 1, 1);
        assert!(matches!(
            ledger.handle(&JournalCommand::ReverseJournalEntry(early)).unwrap_err(),
            DomainError::Validation(_)
        ));

        let first = reverse_cmd(tenant_id, ledger_id, entry_id);
        let reversal_id = first.reversal_entry_id;
        execute(&mut ledger, &JournalCommand::ReverseJournalEntry(first)).unwrap();

        let again = reverse_cmd(tenant_id, ledger_id, entry_id);
        assert!(ledger
            .handle(&JournalCommand::ReverseJournalEntry(again))
            .unwrap_err()
            .is_conflict());

        let of_reversal = reverse_cmd(tenant_id, ledger_id, reversal_id);
        assert!(matches!(
            ledger.handle(&JournalCommand::ReverseJournalEntry(of_reversal)).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Posted and reversal events always net to zero across all lines.
        #[test]
        fn debits_equal_credits_in_all_events(
            entries in prop::collection::vec((1u64..1_000_000u64, 1u64..1_000_000u64, any::<bool>()), 1..10)
        ) {
            let tenant_id = TenantId::new();
            let ledger_id = LedgerId::for_tenant(tenant_id);
            let mut ledger = Ledger::empty(ledger_id);

            let mut all_events: Vec<LedgerEvent> = Vec::new();

            for (a, b, reverse) in entries {
                // Split debit across two accounts, one balancing credit.
                let lines = vec![
                    JournalEntryLine::debit(&test_account("1000", AccountKind::Asset), a),
                    JournalEntryLine::debit(&test_account("6000", AccountKind::Expense), b),
                    JournalEntryLine::credit(&test_account("2000", AccountKind::Liability), a + b),
                ];
                let cmd = post_cmd(tenant_id, ledger_id, lines);
                let entry_id = cmd.entry_id;
                all_events.extend(execute(&mut ledger, &JournalCommand::PostJournalEntry(cmd)).unwrap());

                if reverse {
                    let cmd = reverse_cmd(tenant_id, ledger_id, entry_id);
                    all_events.extend(
                        execute(&mut ledger, &JournalCommand::ReverseJournalEntry(cmd)).unwrap(),
                    );
                }
            }

            let total: i128 = all_events
                .iter()
                .flat_map(|ev| ev.lines())
                .map(JournalEntryLine::signed_amount)
                .sum();
            prop_assert_eq!(total, 0);
        }
    }
}
