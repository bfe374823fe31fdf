use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use keel_events::Event;

use crate::payslip::{PayrollEmployee, PayrollTotals, Payslip, calculate_payslip};
use crate::period::PayPeriod;
use crate::policy::PayrollPolicy;

/// Payroll run identifier, derived from `(tenant, period)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayrollRunId(pub AggregateId);

impl PayrollRunId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The one run a tenant can have for `period`.
    pub fn for_period(tenant_id: TenantId, period: PayPeriod) -> Self {
        Self(AggregateId::derived(tenant_id, "payroll.run", &period.to_string()))
    }
}

impl core::fmt::Display for PayrollRunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Run lifecycle.
///
/// `Draft -> Processed (-> Processed ...) -> Approved -> Posted`, with
/// `Cancelled` reachable from `Draft` and `Processed` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayrollRunStatus {
    Draft,
    Processed,
    Approved,
    Posted,
    Cancelled,
}

/// Aggregate root: PayrollRun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRun {
    id: PayrollRunId,
    tenant_id: Option<TenantId>,
    period: Option<PayPeriod>,
    pay_date: Option<NaiveDate>,
    status: PayrollRunStatus,
    payslips: Vec<Payslip>,
    totals: PayrollTotals,
    approved_by: Option<UserId>,
    journal_entry_id: Option<AggregateId>,
    version: u64,
    created: bool,
}

impl PayrollRun {
    pub fn empty(id: PayrollRunId) -> Self {
        Self {
            id,
            tenant_id: None,
            period: None,
            pay_date: None,
            status: PayrollRunStatus::Draft,
            payslips: Vec::new(),
            totals: PayrollTotals::default(),
            approved_by: None,
            journal_entry_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PayrollRunId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn period(&self) -> Option<PayPeriod> {
        self.period
    }

    pub fn pay_date(&self) -> Option<NaiveDate> {
        self.pay_date
    }

    pub fn status(&self) -> PayrollRunStatus {
        self.status
    }

    pub fn payslips(&self) -> &[Payslip] {
        &self.payslips
    }

    pub fn totals(&self) -> PayrollTotals {
        self.totals
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn journal_entry_id(&self) -> Option<AggregateId> {
        self.journal_entry_id
    }
}

impl AggregateRoot for PayrollRun {
    type Id = PayrollRunId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayrollRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Compute payslips for every employee on the payroll during the period.
///
/// `employees` may include people outside the period; they are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPayrollRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub employees: Vec<PayrollEmployee>,
    pub policy: PayrollPolicy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePayrollRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Records the ledger entry that booked an approved run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayrollRunPosted {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub journal_entry_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayrollRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayrollRunCommand {
    CreatePayrollRun(CreatePayrollRun),
    ProcessPayrollRun(ProcessPayrollRun),
    ApprovePayrollRun(ApprovePayrollRun),
    MarkPayrollRunPosted(MarkPayrollRunPosted),
    CancelPayrollRun(CancelPayrollRun),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRunCreated {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Replaces any payslips from an earlier processing of the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRunProcessed {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period: PayPeriod,
    pub policy: PayrollPolicy,
    pub payslips: Vec<Payslip>,
    pub totals: PayrollTotals,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRunApproved {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
    pub approved_by: UserId,
    pub totals: PayrollTotals,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRunPosted {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub journal_entry_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRunCancelled {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayrollRunEvent {
    PayrollRunCreated(PayrollRunCreated),
    PayrollRunProcessed(PayrollRunProcessed),
    PayrollRunApproved(PayrollRunApproved),
    PayrollRunPosted(PayrollRunPosted),
    PayrollRunCancelled(PayrollRunCancelled),
}

impl PayrollRunEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            PayrollRunEvent::PayrollRunCreated(e) => e.tenant_id,
            PayrollRunEvent::PayrollRunProcessed(e) => e.tenant_id,
            PayrollRunEvent::PayrollRunApproved(e) => e.tenant_id,
            PayrollRunEvent::PayrollRunPosted(e) => e.tenant_id,
            PayrollRunEvent::PayrollRunCancelled(e) => e.tenant_id,
        }
    }
}

impl Event for PayrollRunEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayrollRunEvent::PayrollRunCreated(_) => "payroll.run.created",
            PayrollRunEvent::PayrollRunProcessed(_) => "payroll.run.processed",
            PayrollRunEvent::PayrollRunApproved(_) => "payroll.run.approved",
            PayrollRunEvent::PayrollRunPosted(_) => "payroll.run.posted",
            PayrollRunEvent::PayrollRunCancelled(_) => "payroll.run.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PayrollRunEvent::PayrollRunCreated(e) => e.occurred_at,
            PayrollRunEvent::PayrollRunProcessed(e) => e.occurred_at,
            PayrollRunEvent::PayrollRunApproved(e) => e.occurred_at,
            PayrollRunEvent::PayrollRunPosted(e) => e.occurred_at,
            PayrollRunEvent::PayrollRunCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PayrollRun {
    type Command = PayrollRunCommand;
    type Event = PayrollRunEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PayrollRunEvent::PayrollRunCreated(e) => {
                self.id = e.run_id;
                self.tenant_id = Some(e.tenant_id);
                self.period = Some(e.period);
                self.pay_date = Some(e.pay_date);
                self.status = PayrollRunStatus::Draft;
                self.created = true;
            }
            PayrollRunEvent::PayrollRunProcessed(e) => {
                self.payslips = e.payslips.clone();
                self.totals = e.totals;
                self.status = PayrollRunStatus::Processed;
            }
            PayrollRunEvent::PayrollRunApproved(e) => {
                self.approved_by = Some(e.approved_by);
                self.status = PayrollRunStatus::Approved;
            }
            PayrollRunEvent::PayrollRunPosted(e) => {
                self.journal_entry_id = Some(e.journal_entry_id);
                self.status = PayrollRunStatus::Posted;
            }
            PayrollRunEvent::PayrollRunCancelled(_) => {
                self.status = PayrollRunStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PayrollRunCommand::CreatePayrollRun(cmd) => self.handle_create(cmd),
            PayrollRunCommand::ProcessPayrollRun(cmd) => self.handle_process(cmd),
            PayrollRunCommand::ApprovePayrollRun(cmd) => self.handle_approve(cmd),
            PayrollRunCommand::MarkPayrollRunPosted(cmd) => self.handle_mark_posted(cmd),
            PayrollRunCommand::CancelPayrollRun(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PayrollRun {
    fn ensure_target(&self, tenant_id: TenantId, run_id: PayrollRunId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != run_id {
            return Err(DomainError::invariant("run_id mismatch"));
        }
        Ok(())
    }

    fn require_period(&self) -> Result<PayPeriod, DomainError> {
        self.period
            .ok_or_else(|| DomainError::invariant("payroll run has no period"))
    }

    fn handle_create(&self, cmd: &CreatePayrollRun) -> Result<Vec<PayrollRunEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "a payroll run for {} already exists",
                cmd.period
            )));
        }
        if cmd.run_id != PayrollRunId::for_period(cmd.tenant_id, cmd.period) {
            return Err(DomainError::invariant(
                "payroll run id must be derived from tenant and period",
            ));
        }
        if cmd.pay_date < cmd.period.start() {
            return Err(DomainError::validation(
                "pay_date cannot precede the start of the pay period",
            ));
        }

        Ok(vec![PayrollRunEvent::PayrollRunCreated(PayrollRunCreated {
            tenant_id: cmd.tenant_id,
            run_id: cmd.run_id,
            period: cmd.period,
            pay_date: cmd.pay_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_process(&self, cmd: &ProcessPayrollRun) -> Result<Vec<PayrollRunEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.run_id)?;
        match self.status {
            PayrollRunStatus::Draft | PayrollRunStatus::Processed => {}
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot process a payroll run in status {other:?}"
                )));
            }
        }
        cmd.policy.validate()?;

        let mut seen = HashSet::new();
        for e in &cmd.employees {
            if !seen.insert(e.employee_id) {
                return Err(DomainError::validation(format!(
                    "employee {} listed more than once",
                    e.employee_id
                )));
            }
        }

        let period = self.require_period()?;
        let mut payslips = Vec::new();
        for employee in &cmd.employees {
            if let Some(slip) = calculate_payslip(employee, period, &cmd.policy)? {
                payslips.push(slip);
            }
        }
        if payslips.is_empty() {
            return Err(DomainError::validation(format!(
                "no employees on the payroll during {period}"
            )));
        }
        payslips.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));
        let totals = PayrollTotals::from_payslips(&payslips)?;

        Ok(vec![PayrollRunEvent::PayrollRunProcessed(PayrollRunProcessed {
            tenant_id: cmd.tenant_id,
            run_id: cmd.run_id,
            period,
            policy: cmd.policy,
            payslips,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApprovePayrollRun) -> Result<Vec<PayrollRunEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.run_id)?;
        if self.status != PayrollRunStatus::Processed {
            return Err(DomainError::invariant(format!(
                "only processed payroll runs can be approved (status {:?})",
                self.status
            )));
        }
        let pay_date = self
            .pay_date
            .ok_or_else(|| DomainError::invariant("payroll run has no pay date"))?;

        Ok(vec![PayrollRunEvent::PayrollRunApproved(PayrollRunApproved {
            tenant_id: cmd.tenant_id,
            run_id: cmd.run_id,
            period: self.require_period()?,
            pay_date,
            approved_by: cmd.approved_by,
            totals: self.totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_posted(
        &self,
        cmd: &MarkPayrollRunPosted,
    ) -> Result<Vec<PayrollRunEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.run_id)?;
        match self.status {
            PayrollRunStatus::Approved => {}
            PayrollRunStatus::Posted => {
                return Err(DomainError::conflict("payroll run is already posted"));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "only approved payroll runs can be posted (status {other:?})"
                )));
            }
        }

        Ok(vec![PayrollRunEvent::PayrollRunPosted(PayrollRunPosted {
            tenant_id: cmd.tenant_id,
            run_id: cmd.run_id,
            journal_entry_id: cmd.journal_entry_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPayrollRun) -> Result<Vec<PayrollRunEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.run_id)?;
        match self.status {
            PayrollRunStatus::Draft | PayrollRunStatus::Processed => {}
            PayrollRunStatus::Cancelled => {
                return Err(DomainError::conflict("payroll run is already cancelled"));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot cancel a payroll run in status {other:?}"
                )));
            }
        }

        Ok(vec![PayrollRunEvent::PayrollRunCancelled(PayrollRunCancelled {
            tenant_id: cmd.tenant_id,
            run_id: cmd.run_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
