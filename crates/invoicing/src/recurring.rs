use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use keel_core::money::prorate;
use keel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, TenantId};
use keel_events::Event;

use crate::customer::CustomerRef;
use crate::invoice::{InvoiceId, InvoiceLine, InvoiceSource, IssueInvoice};
use crate::schedule::{BillingRun, RecurrenceRule, plan_first_run, plan_next_run};

/// Payment terms above this are rejected as input mistakes.
const MAX_PAYMENT_TERMS_DAYS: u32 = 365;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurringInvoiceId(pub AggregateId);

impl RecurringInvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RecurringInvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl RecurringStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecurringStatus::Cancelled | RecurringStatus::Completed)
    }
}

/// Aggregate root: a recurring invoice schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringInvoice {
    id: RecurringInvoiceId,
    tenant_id: Option<TenantId>,
    customer: Option<CustomerRef>,
    lines: Vec<InvoiceLine>,
    rule: Option<RecurrenceRule>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    payment_terms_days: u32,
    prorate: bool,
    status: RecurringStatus,
    next_run: Option<BillingRun>,
    generated_count: u32,
    last_invoice_id: Option<InvoiceId>,
    version: u64,
    created: bool,
}

impl RecurringInvoice {
    pub fn empty(id: RecurringInvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            customer: None,
            lines: Vec::new(),
            rule: None,
            start_date: None,
            end_date: None,
            payment_terms_days: 0,
            prorate: false,
            status: RecurringStatus::Active,
            next_run: None,
            generated_count: 0,
            last_invoice_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RecurringInvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn customer(&self) -> Option<&CustomerRef> {
        self.customer.as_ref()
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn rule(&self) -> Option<RecurrenceRule> {
        self.rule
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn payment_terms_days(&self) -> u32 {
        self.payment_terms_days
    }

    pub fn prorate(&self) -> bool {
        self.prorate
    }

    pub fn status(&self) -> RecurringStatus {
        self.status
    }

    /// The run the schedule is waiting to bill.
    pub fn next_run(&self) -> Option<BillingRun> {
        self.next_run
    }

    pub fn generated_count(&self) -> u32 {
        self.generated_count
    }

    pub fn last_invoice_id(&self) -> Option<InvoiceId> {
        self.last_invoice_id
    }

    /// Pending run if the schedule is active and the run is on or before `as_of`.
    pub fn due_run(&self, as_of: NaiveDate) -> Option<BillingRun> {
        if self.status != RecurringStatus::Active {
            return None;
        }
        self.next_run.filter(|run| run.run_date <= as_of)
    }

    /// Invoice for `run`. A prorated run bills each line's total scaled by
    /// the proration as a single unit. Lines that round to zero are dropped,
    /// and `None` means the whole run rounds to nothing.
    pub fn draft_invoice(
        &self,
        run: &BillingRun,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Option<IssueInvoice>> {
        let (Some(tenant_id), Some(customer)) = (self.tenant_id, self.customer.as_ref()) else {
            return Err(DomainError::not_found());
        };

        let mut lines = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let Some(p) = run.proration else {
                lines.push(line.clone());
                continue;
            };
            let total = line.amount()?;
            let billed = prorate(total, p.billed_days, p.period_days)?;
            if billed == 0 {
                continue;
            }
            lines.push(InvoiceLine {
                description: format!(
                    "{} (prorated {}/{} days)",
                    line.description, p.billed_days, p.period_days
                ),
                quantity: 1,
                unit_price: billed,
            });
        }
        if lines.is_empty() {
            return Ok(None);
        }

        let due_date = run
            .run_date
            .checked_add_signed(Duration::days(i64::from(self.payment_terms_days)))
            .ok_or_else(|| DomainError::invariant("due date out of range"))?;

        Ok(Some(IssueInvoice {
            tenant_id,
            invoice_id: InvoiceId::for_schedule_run(tenant_id, self.id, run.run_date),
            customer: customer.clone(),
            lines,
            issue_date: run.run_date,
            due_date,
            source: Some(InvoiceSource {
                schedule_id: self.id,
                period_start: run.period_start,
                period_end: run.period_end,
            }),
            occurred_at,
        }))
    }
}

impl AggregateRoot for RecurringInvoice {
    type Id = RecurringInvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRecurringInvoice {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub rule: RecurrenceRule,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payment_terms_days: u32,
    pub prorate: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInvoiceGenerated {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub run_date: NaiveDate,
    /// `None` when the run rounded to nothing and no invoice was issued.
    pub invoice_id: Option<InvoiceId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRecurringInvoice {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecurringInvoice {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    /// Runs dated before this are skipped, not billed.
    pub resume_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRecurringInvoice {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurringInvoiceCommand {
    CreateRecurringInvoice(CreateRecurringInvoice),
    RecordInvoiceGenerated(RecordInvoiceGenerated),
    PauseRecurringInvoice(PauseRecurringInvoice),
    ResumeRecurringInvoice(ResumeRecurringInvoice),
    CancelRecurringInvoice(CancelRecurringInvoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringInvoiceCreated {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub rule: RecurrenceRule,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payment_terms_days: u32,
    pub prorate: bool,
    pub first_run: BillingRun,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceGenerated {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub run_date: NaiveDate,
    pub invoice_id: Option<InvoiceId>,
    pub next_run: Option<BillingRun>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringInvoicePaused {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringInvoiceResumed {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub resume_on: NaiveDate,
    pub skipped_runs: u32,
    pub next_run: Option<BillingRun>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringInvoiceCancelled {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringInvoiceCompleted {
    pub tenant_id: TenantId,
    pub schedule_id: RecurringInvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurringInvoiceEvent {
    RecurringInvoiceCreated(RecurringInvoiceCreated),
    InvoiceGenerated(InvoiceGenerated),
    RecurringInvoicePaused(RecurringInvoicePaused),
    RecurringInvoiceResumed(RecurringInvoiceResumed),
    RecurringInvoiceCancelled(RecurringInvoiceCancelled),
    RecurringInvoiceCompleted(RecurringInvoiceCompleted),
}

impl RecurringInvoiceEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            RecurringInvoiceEvent::RecurringInvoiceCreated(e) => e.tenant_id,
            RecurringInvoiceEvent::InvoiceGenerated(e) => e.tenant_id,
            RecurringInvoiceEvent::RecurringInvoicePaused(e) => e.tenant_id,
            RecurringInvoiceEvent::RecurringInvoiceResumed(e) => e.tenant_id,
            RecurringInvoiceEvent::RecurringInvoiceCancelled(e) => e.tenant_id,
            RecurringInvoiceEvent::RecurringInvoiceCompleted(e) => e.tenant_id,
        }
    }
}

impl Event for RecurringInvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RecurringInvoiceEvent::RecurringInvoiceCreated(_) => "invoicing.recurring.created",
            RecurringInvoiceEvent::InvoiceGenerated(_) => "invoicing.recurring.invoice_generated",
            RecurringInvoiceEvent::RecurringInvoicePaused(_) => "invoicing.recurring.paused",
            RecurringInvoiceEvent::RecurringInvoiceResumed(_) => "invoicing.recurring.resumed",
            RecurringInvoiceEvent::RecurringInvoiceCancelled(_) => "invoicing.recurring.cancelled",
            RecurringInvoiceEvent::RecurringInvoiceCompleted(_) => "invoicing.recurring.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RecurringInvoiceEvent::RecurringInvoiceCreated(e) => e.occurred_at,
            RecurringInvoiceEvent::InvoiceGenerated(e) => e.occurred_at,
            RecurringInvoiceEvent::RecurringInvoicePaused(e) => e.occurred_at,
            RecurringInvoiceEvent::RecurringInvoiceResumed(e) => e.occurred_at,
            RecurringInvoiceEvent::RecurringInvoiceCancelled(e) => e.occurred_at,
            RecurringInvoiceEvent::RecurringInvoiceCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for RecurringInvoice {
    type Command = RecurringInvoiceCommand;
    type Event = RecurringInvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RecurringInvoiceEvent::RecurringInvoiceCreated(e) => {
                self.id = e.schedule_id;
                self.tenant_id = Some(e.tenant_id);
                self.customer = Some(e.customer.clone());
                self.lines = e.lines.clone();
                self.rule = Some(e.rule);
                self.start_date = Some(e.start_date);
                self.end_date = e.end_date;
                self.payment_terms_days = e.payment_terms_days;
                self.prorate = e.prorate;
                self.status = RecurringStatus::Active;
                self.next_run = Some(e.first_run);
                self.created = true;
            }
            RecurringInvoiceEvent::InvoiceGenerated(e) => {
                self.generated_count += 1;
                if e.invoice_id.is_some() {
                    self.last_invoice_id = e.invoice_id;
                }
                self.next_run = e.next_run;
            }
            RecurringInvoiceEvent::RecurringInvoicePaused(_) => {
                self.status = RecurringStatus::Paused;
            }
            RecurringInvoiceEvent::RecurringInvoiceResumed(e) => {
                self.status = RecurringStatus::Active;
                self.next_run = e.next_run;
            }
            RecurringInvoiceEvent::RecurringInvoiceCancelled(_) => {
                self.status = RecurringStatus::Cancelled;
                self.next_run = None;
            }
            RecurringInvoiceEvent::RecurringInvoiceCompleted(_) => {
                self.status = RecurringStatus::Completed;
                self.next_run = None;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RecurringInvoiceCommand::CreateRecurringInvoice(cmd) => self.handle_create(cmd),
            RecurringInvoiceCommand::RecordInvoiceGenerated(cmd) => self.handle_generated(cmd),
            RecurringInvoiceCommand::PauseRecurringInvoice(cmd) => self.handle_pause(cmd),
            RecurringInvoiceCommand::ResumeRecurringInvoice(cmd) => self.handle_resume(cmd),
            RecurringInvoiceCommand::CancelRecurringInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl RecurringInvoice {
    fn ensure_target(
        &self,
        tenant_id: TenantId,
        schedule_id: RecurringInvoiceId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != schedule_id {
            return Err(DomainError::invariant("schedule_id mismatch"));
        }
        Ok(())
    }

    fn rule_or_err(&self) -> Result<RecurrenceRule, DomainError> {
        self.rule
            .ok_or_else(|| DomainError::invariant("schedule has no recurrence rule"))
    }

    fn completed(&self, tenant_id: TenantId, occurred_at: DateTime<Utc>) -> RecurringInvoiceEvent {
        RecurringInvoiceEvent::RecurringInvoiceCompleted(RecurringInvoiceCompleted {
            tenant_id,
            schedule_id: self.id,
            occurred_at,
        })
    }

    fn handle_create(
        &self,
        cmd: &CreateRecurringInvoice,
    ) -> Result<Vec<RecurringInvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("recurring invoice already exists"));
        }
        cmd.customer.validate()?;
        cmd.rule.validate()?;
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("recurring invoice needs at least one line"));
        }
        for line in &cmd.lines {
            line.amount()?;
        }
        if cmd.end_date.is_some_and(|end| end < cmd.start_date) {
            return Err(DomainError::validation("end_date cannot precede start_date"));
        }
        if cmd.payment_terms_days > MAX_PAYMENT_TERMS_DAYS {
            return Err(DomainError::validation(format!(
                "payment_terms_days cannot exceed {MAX_PAYMENT_TERMS_DAYS}"
            )));
        }

        let first_run = plan_first_run(&cmd.rule, cmd.start_date, cmd.end_date, cmd.prorate)
            .ok_or_else(|| DomainError::validation("schedule ends before its first invoice"))?;

        Ok(vec![RecurringInvoiceEvent::RecurringInvoiceCreated(RecurringInvoiceCreated {
            tenant_id: cmd.tenant_id,
            schedule_id: cmd.schedule_id,
            customer: cmd.customer.clone(),
            lines: cmd.lines.clone(),
            rule: cmd.rule,
            start_date: cmd.start_date,
            end_date: cmd.end_date,
            payment_terms_days: cmd.payment_terms_days,
            prorate: cmd.prorate,
            first_run,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_generated(
        &self,
        cmd: &RecordInvoiceGenerated,
    ) -> Result<Vec<RecurringInvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.schedule_id)?;

        match self.status {
            RecurringStatus::Active => {}
            RecurringStatus::Paused => {
                return Err(DomainError::invariant("schedule is paused"));
            }
            RecurringStatus::Cancelled | RecurringStatus::Completed => {
                return Err(DomainError::conflict("schedule is no longer active"));
            }
        }

        let pending = self
            .next_run
            .ok_or_else(|| DomainError::conflict("schedule has no pending run"))?;
        if pending.run_date != cmd.run_date {
            return Err(DomainError::conflict(format!(
                "run {} is not the pending run {}",
                cmd.run_date, pending.run_date
            )));
        }

        let next_run = plan_next_run(&self.rule_or_err()?, &pending, self.end_date, self.prorate);
        let mut events = vec![RecurringInvoiceEvent::InvoiceGenerated(InvoiceGenerated {
            tenant_id: cmd.tenant_id,
            schedule_id: cmd.schedule_id,
            run_date: cmd.run_date,
            invoice_id: cmd.invoice_id,
            next_run,
            occurred_at: cmd.occurred_at,
        })];
        if next_run.is_none() {
            events.push(self.completed(cmd.tenant_id, cmd.occurred_at));
        }
        Ok(events)
    }

    fn handle_pause(
        &self,
        cmd: &PauseRecurringInvoice,
    ) -> Result<Vec<RecurringInvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.schedule_id)?;
        match self.status {
            RecurringStatus::Active => {}
            RecurringStatus::Paused => return Err(DomainError::conflict("schedule is already paused")),
            _ => return Err(DomainError::invariant("cannot pause a finished schedule")),
        }

        Ok(vec![RecurringInvoiceEvent::RecurringInvoicePaused(RecurringInvoicePaused {
            tenant_id: cmd.tenant_id,
            schedule_id: cmd.schedule_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resume(
        &self,
        cmd: &ResumeRecurringInvoice,
    ) -> Result<Vec<RecurringInvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.schedule_id)?;
        match self.status {
            RecurringStatus::Paused => {}
            RecurringStatus::Active => return Err(DomainError::conflict("schedule is not paused")),
            _ => return Err(DomainError::invariant("cannot resume a finished schedule")),
        }

        let rule = self.rule_or_err()?;
        let mut skipped_runs = 0u32;
        let mut next_run = self.next_run;
        while let Some(run) = next_run {
            if run.run_date >= cmd.resume_on {
                break;
            }
            skipped_runs += 1;
            next_run = plan_next_run(&rule, &run, self.end_date, self.prorate);
        }

        let mut events = vec![RecurringInvoiceEvent::RecurringInvoiceResumed(RecurringInvoiceResumed {
            tenant_id: cmd.tenant_id,
            schedule_id: cmd.schedule_id,
            resume_on: cmd.resume_on,
            skipped_runs,
            next_run,
            occurred_at: cmd.occurred_at,
        })];
        if next_run.is_none() {
            events.push(self.completed(cmd.tenant_id, cmd.occurred_at));
        }
        Ok(events)
    }

    fn handle_cancel(
        &self,
        cmd: &CancelRecurringInvoice,
    ) -> Result<Vec<RecurringInvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.schedule_id)?;
        match self.status {
            RecurringStatus::Active | RecurringStatus::Paused => {}
            RecurringStatus::Cancelled => {
                return Err(DomainError::conflict("schedule is already cancelled"));
            }
            RecurringStatus::Completed => {
                return Err(DomainError::invariant("cannot cancel a completed schedule"));
            }
        }

        Ok(vec![RecurringInvoiceEvent::RecurringInvoiceCancelled(RecurringInvoiceCancelled {
            tenant_id: cmd.tenant_id,
            schedule_id: cmd.schedule_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Invoice, InvoiceCommand};
    use keel_events::execute;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn create_cmd(
        tenant_id: TenantId,
        schedule_id: RecurringInvoiceId,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        anchor_day: u32,
    ) -> CreateRecurringInvoice {
        CreateRecurringInvoice {
            tenant_id,
            schedule_id,
            customer: CustomerRef {
                customer_id: AggregateId::new(),
                name: "Contoso".into(),
            },
            lines: vec![InvoiceLine {
                description: "Hosting".into(),
                quantity: 1,
                unit_price: 3_000,
            }],
            rule: RecurrenceRule::monthly_on(anchor_day),
            start_date,
            end_date,
            payment_terms_days: 14,
            prorate: true,
            occurred_at: Utc::now(),
        }
    }

    fn created(
        tenant_id: TenantId,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        anchor_day: u32,
    ) -> RecurringInvoice {
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());
        let mut schedule = RecurringInvoice::empty(schedule_id);
        execute(
            &mut schedule,
            &RecurringInvoiceCommand::CreateRecurringInvoice(create_cmd(
                tenant_id,
                schedule_id,
                start_date,
                end_date,
                anchor_day,
            )),
        )
        .unwrap();
        schedule
    }

    fn record(schedule: &RecurringInvoice, run_date: NaiveDate) -> RecurringInvoiceCommand {
        let tenant_id = schedule.tenant_id().unwrap();
        RecurringInvoiceCommand::RecordInvoiceGenerated(RecordInvoiceGenerated {
            tenant_id,
            schedule_id: schedule.id_typed(),
            run_date,
            invoice_id: Some(InvoiceId::for_schedule_run(tenant_id, schedule.id_typed(), run_date)),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_plans_first_run() {
        let schedule = created(TenantId::new(), d(2024, 1, 31), None, 31);
        assert_eq!(schedule.status(), RecurringStatus::Active);
        assert_eq!(schedule.next_run().unwrap().run_date, d(2024, 1, 31));
        assert!(schedule.due_run(d(2024, 1, 30)).is_none());
        assert!(schedule.due_run(d(2024, 1, 31)).is_some());
    }

    #[test]
    fn create_rejects_invalid_schedules() {
        let tenant_id = TenantId::new();
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());
        let schedule = RecurringInvoice::empty(schedule_id);

        let mut bad_end = create_cmd(tenant_id, schedule_id, d(2024, 5, 1), None, 1);
        bad_end.end_date = Some(d(2024, 4, 1));
        let mut bad_anchor = create_cmd(tenant_id, schedule_id, d(2024, 5, 1), None, 1);
        bad_anchor.rule.anchor_day = 0;
        let mut no_lines = create_cmd(tenant_id, schedule_id, d(2024, 5, 1), None, 1);
        no_lines.lines.clear();

        for cmd in [bad_end, bad_anchor, no_lines] {
            let err = schedule.handle(&RecurringInvoiceCommand::CreateRecurringInvoice(cmd)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
        }
    }

    #[test]
    fn recording_advances_with_rollover() {
        let mut schedule = created(TenantId::new(), d(2024, 1, 31), None, 31);
        let january = record(&schedule, d(2024, 1, 31));
        execute(&mut schedule, &january).unwrap();
        assert_eq!(schedule.next_run().unwrap().run_date, d(2024, 2, 29));
        let february = record(&schedule, d(2024, 2, 29));
        execute(&mut schedule, &february).unwrap();
        assert_eq!(schedule.next_run().unwrap().run_date, d(2024, 3, 31));
        assert_eq!(schedule.generated_count(), 2);
    }

    #[test]
    fn replayed_run_is_a_conflict() {
        let mut schedule = created(TenantId::new(), d(2024, 3, 1), None, 1);
        let cmd = record(&schedule, d(2024, 3, 1));
        execute(&mut schedule, &cmd).unwrap();
        assert!(schedule.handle(&cmd).unwrap_err().is_conflict());
    }

    #[test]
    fn last_run_completes_the_schedule() {
        let mut schedule = created(TenantId::new(), d(2024, 1, 1), Some(d(2024, 2, 15)), 1);
        let first = record(&schedule, d(2024, 1, 1));
        execute(&mut schedule, &first).unwrap();
        let last = schedule.next_run().unwrap();
        assert_eq!(last.period_end, d(2024, 2, 15));

        let final_run = record(&schedule, d(2024, 2, 1));
        let events = execute(&mut schedule, &final_run).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], RecurringInvoiceEvent::RecurringInvoiceCompleted(_)));
        assert_eq!(schedule.status(), RecurringStatus::Completed);
        assert!(schedule.next_run().is_none());
    }

    #[test]
    fn resume_skips_missed_runs() {
        let tenant_id = TenantId::new();
        let mut schedule = created(tenant_id, d(2024, 1, 1), None, 1);
        let schedule_id = schedule.id_typed();
        execute(
            &mut schedule,
            &RecurringInvoiceCommand::PauseRecurringInvoice(PauseRecurringInvoice {
                tenant_id,
                schedule_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(schedule.due_run(d(2024, 6, 1)).is_none());
        assert!(schedule.handle(&record(&schedule, d(2024, 1, 1))).is_err());

        let events = execute(
            &mut schedule,
            &RecurringInvoiceCommand::ResumeRecurringInvoice(ResumeRecurringInvoice {
                tenant_id,
                schedule_id,
                resume_on: d(2024, 4, 10),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        match &events[0] {
            RecurringInvoiceEvent::RecurringInvoiceResumed(e) => assert_eq!(e.skipped_runs, 4),
            other => panic!("Expected Resumed, got {other:?}"),
        }
        assert_eq!(schedule.status(), RecurringStatus::Active);
        assert_eq!(schedule.next_run().unwrap().run_date, d(2024, 5, 1));
    }

    #[test]
    fn cancel_is_terminal() {
        let tenant_id = TenantId::new();
        let mut schedule = created(tenant_id, d(2024, 1, 1), None, 1);
        let cancel = RecurringInvoiceCommand::CancelRecurringInvoice(CancelRecurringInvoice {
            tenant_id,
            schedule_id: schedule.id_typed(),
            reason: None,
            occurred_at: Utc::now(),
        });
        execute(&mut schedule, &cancel).unwrap();
        assert_eq!(schedule.status(), RecurringStatus::Cancelled);
        assert!(schedule.handle(&cancel).unwrap_err().is_conflict());
        assert!(schedule.due_run(d(2030, 1, 1)).is_none());
    }

    #[test]
    fn drafted_stub_invoice_is_prorated_and_issuable() {
        let schedule = created(TenantId::new(), d(2024, 4, 16), None, 1);
        let run = schedule.next_run().unwrap();
        let draft = schedule.draft_invoice(&run, Utc::now()).unwrap().unwrap();

        assert_eq!(draft.issue_date, d(2024, 4, 16));
        assert_eq!(draft.due_date, d(2024, 4, 30));
        assert_eq!(draft.lines[0].unit_price, 1_500);
        assert_eq!(draft.lines[0].description, "Hosting (prorated 15/30 days)");
        assert_eq!(draft.source.unwrap().period_end, d(2024, 4, 30));

        let mut invoice = Invoice::empty(draft.invoice_id);
        let events = execute(&mut invoice, &InvoiceCommand::IssueInvoice(draft)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(invoice.total_amount(), 1_500);
    }

    #[test]
    fn stub_prorates_line_totals_as_one_unit() {
        let tenant_id = TenantId::new();
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());
        let mut cmd = create_cmd(tenant_id, schedule_id, d(2024, 4, 16), None, 1);
        cmd.lines = vec![InvoiceLine {
            description: "Seats".into(),
            quantity: 3,
            unit_price: 333,
        }];
        let mut schedule = RecurringInvoice::empty(schedule_id);
        execute(&mut schedule, &RecurringInvoiceCommand::CreateRecurringInvoice(cmd)).unwrap();

        let run = schedule.next_run().unwrap();
        let draft = schedule.draft_invoice(&run, Utc::now()).unwrap().unwrap();
        // 999 * 15/30, rounded once on the total.
        assert_eq!(draft.lines[0].quantity, 1);
        assert_eq!(draft.lines[0].unit_price, 500);
    }

    #[test]
    fn lines_rounding_to_zero_are_dropped() {
        let tenant_id = TenantId::new();
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());
        // Apr 30 start, anchored on the 1st: a 1/30 stub.
        let mut cmd = create_cmd(tenant_id, schedule_id, d(2024, 4, 30), None, 1);
        cmd.lines.push(InvoiceLine {
            description: "Support".into(),
            quantity: 1,
            unit_price: 10,
        });
        let mut schedule = RecurringInvoice::empty(schedule_id);
        execute(&mut schedule, &RecurringInvoiceCommand::CreateRecurringInvoice(cmd)).unwrap();

        let run = schedule.next_run().unwrap();
        let draft = schedule.draft_invoice(&run, Utc::now()).unwrap().unwrap();
        assert_eq!(draft.lines.len(), 1);
        assert_eq!(draft.lines[0].unit_price, 100);
        assert!(draft.lines[0].description.starts_with("Hosting"));
    }

    #[test]
    fn run_without_invoice_still_advances() {
        let tenant_id = TenantId::new();
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());
        let mut cmd = create_cmd(tenant_id, schedule_id, d(2024, 4, 30), None, 1);
        cmd.lines[0].unit_price = 10;
        let mut schedule = RecurringInvoice::empty(schedule_id);
        execute(&mut schedule, &RecurringInvoiceCommand::CreateRecurringInvoice(cmd)).unwrap();

        let run = schedule.next_run().unwrap();
        assert!(schedule.draft_invoice(&run, Utc::now()).unwrap().is_none());

        let empty_run = RecurringInvoiceCommand::RecordInvoiceGenerated(RecordInvoiceGenerated {
            tenant_id,
            schedule_id,
            run_date: run.run_date,
            invoice_id: None,
            occurred_at: Utc::now(),
        });
        execute(&mut schedule, &empty_run).unwrap();
        assert_eq!(schedule.next_run().unwrap().run_date, d(2024, 5, 1));
        assert_eq!(schedule.generated_count(), 1);
        assert!(schedule.last_invoice_id().is_none());

        let may = schedule.next_run().unwrap();
        let draft = schedule.draft_invoice(&may, Utc::now()).unwrap().unwrap();
        assert_eq!(draft.lines[0].unit_price, 10);
    }
}
