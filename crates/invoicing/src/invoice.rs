use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use keel_events::Event;

use crate::customer::CustomerRef;
use crate::recurring::RecurringInvoiceId;

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Id of the invoice a recurring schedule issues for one run date.
    ///
    /// Re-running the scheduler for the same date targets the same stream, so
    /// a second issue is rejected as a conflict instead of double billing.
    pub fn for_schedule_run(
        tenant_id: TenantId,
        schedule_id: RecurringInvoiceId,
        run_date: NaiveDate,
    ) -> Self {
        Self(AggregateId::derived(
            tenant_id,
            "invoicing.invoice",
            &format!("{schedule_id}:{run_date}"),
        ))
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: i64,
    /// Price in cents.
    pub unit_price: u64,
}

impl InvoiceLine {
    pub fn amount(&self) -> Result<u64, DomainError> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("invoice line description cannot be empty"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("invoice line quantity must be positive"));
        }
        if self.unit_price == 0 {
            return Err(DomainError::validation("invoice line unit_price must be positive"));
        }
        let total = i128::from(self.quantity)
            .checked_mul(i128::from(self.unit_price))
            .ok_or_else(|| DomainError::invariant("invoice line amount overflow"))?;
        u64::try_from(total).map_err(|_| DomainError::invariant("invoice line amount overflow"))
    }
}

/// Links an invoice to the recurring schedule run that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSource {
    pub schedule_id: RecurringInvoiceId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    customer: Option<CustomerRef>,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    source: Option<InvoiceSource>,
    total_amount: u64,
    total_paid: u64,
    payment_count: u32,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Not-yet-issued instance used for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            customer: None,
            status: InvoiceStatus::Open,
            lines: Vec::new(),
            issue_date: None,
            due_date: None,
            source: None,
            total_amount: 0,
            total_paid: 0,
            payment_count: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_issued(&self) -> bool {
        self.created
    }

    pub fn customer(&self) -> Option<&CustomerRef> {
        self.customer.as_ref()
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn source(&self) -> Option<InvoiceSource> {
        self.source
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn total_paid(&self) -> u64 {
        self.total_paid
    }

    pub fn outstanding_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.total_paid)
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn can_accept_payment(&self) -> bool {
        self.status == InvoiceStatus::Open && self.outstanding_amount() > 0
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub source: Option<InvoiceSource>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    /// Payment amount in cents.
    pub amount: u64,
    pub paid_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    VoidInvoice(VoidInvoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub source: Option<InvoiceSource>,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub paid_on: NaiveDate,
    pub new_total_paid: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    InvoiceVoided(InvoiceVoided),
}

impl InvoiceEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.tenant_id,
            InvoiceEvent::PaymentRegistered(e) => e.tenant_id,
            InvoiceEvent::InvoiceVoided(e) => e.tenant_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::InvoiceVoided(_) => "invoicing.invoice.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::InvoiceVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.customer = Some(e.customer.clone());
                self.lines = e.lines.clone();
                self.issue_date = Some(e.issue_date);
                self.due_date = Some(e.due_date);
                self.source = e.source;
                self.total_amount = e.total_amount;
                self.total_paid = 0;
                self.status = InvoiceStatus::Open;
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.total_paid = e.new_total_paid;
                self.payment_count += 1;
                if self.total_paid >= self.total_amount {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::InvoiceVoided(_) => {
                self.status = InvoiceStatus::Void;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::VoidInvoice(cmd) => self.handle_void(cmd),
        }
    }
}

impl Invoice {
    fn ensure_target(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        cmd.customer.validate()?;
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot issue invoice without lines"));
        }
        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation("due_date cannot precede issue_date"));
        }
        if let Some(source) = &cmd.source {
            if source.period_end < source.period_start {
                return Err(DomainError::validation("billing period ends before it starts"));
            }
        }

        let mut total: u64 = 0;
        for line in &cmd.lines {
            total = total
                .checked_add(line.amount()?)
                .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;
        }

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            customer: cmd.customer.clone(),
            lines: cmd.lines.clone(),
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            source: cmd.source,
            total_amount: total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invariant(
                "cannot register payment on void or fully paid invoice",
            ));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.issue_date.is_some_and(|issued| cmd.paid_on < issued) {
            return Err(DomainError::validation("payment cannot precede the issue date"));
        }

        let new_total_paid = self
            .total_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;
        if new_total_paid > self.total_amount {
            return Err(DomainError::invariant("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            paid_on: cmd.paid_on,
            new_total_paid,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if self.status == InvoiceStatus::Void {
            return Err(DomainError::conflict("invoice is already void"));
        }
        if self.payment_count > 0 {
            return Err(DomainError::invariant(
                "cannot void an invoice with registered payments",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceVoided(InvoiceVoided {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_events::execute;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_customer() -> CustomerRef {
        CustomerRef {
            customer_id: AggregateId::new(),
            name: "Northwind".into(),
        }
    }

    fn line(quantity: i64, unit_price: u64) -> InvoiceLine {
        InvoiceLine {
            description: "Consulting".into(),
            quantity,
            unit_price,
        }
    }

    fn issue_cmd(tenant_id: TenantId, invoice_id: InvoiceId, lines: Vec<InvoiceLine>) -> IssueInvoice {
        IssueInvoice {
            tenant_id,
            invoice_id,
            customer: test_customer(),
            lines,
            issue_date: d(2024, 3, 1),
            due_date: d(2024, 3, 31),
            source: None,
            occurred_at: Utc::now(),
        }
    }

    fn issued(tenant_id: TenantId) -> Invoice {
        let invoice_id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(invoice_id);
        execute(
            &mut invoice,
            &InvoiceCommand::IssueInvoice(issue_cmd(tenant_id, invoice_id, vec![line(2, 100)])),
        )
        .unwrap();
        invoice
    }

    fn pay(invoice: &Invoice, tenant_id: TenantId, amount: u64) -> InvoiceCommand {
        InvoiceCommand::RegisterPayment(RegisterPayment {
            tenant_id,
            invoice_id: invoice.id_typed(),
            amount,
            paid_on: d(2024, 3, 10),
            occurred_at: Utc::now(),
        })
    }

    fn void(invoice: &Invoice, tenant_id: TenantId) -> InvoiceCommand {
        InvoiceCommand::VoidInvoice(VoidInvoice {
            tenant_id,
            invoice_id: invoice.id_typed(),
            reason: Some("Customer dispute".into()),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn issue_invoice_totals_its_lines() {
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let events = Invoice::empty(invoice_id)
            .handle(&InvoiceCommand::IssueInvoice(issue_cmd(
                tenant_id,
                invoice_id,
                vec![line(2, 100), line(1, 250)],
            )))
            .unwrap();

        match &events[0] {
            InvoiceEvent::InvoiceIssued(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.total_amount, 450);
                assert_eq!(e.due_date, d(2024, 3, 31));
            }
            other => panic!("Expected InvoiceIssued, got {other:?}"),
        }
    }

    #[test]
    fn issue_rejects_bad_lines_and_dates() {
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let invoice = Invoice::empty(invoice_id);

        for lines in [vec![], vec![line(0, 100)], vec![line(1, 0)]] {
            let err = invoice
                .handle(&InvoiceCommand::IssueInvoice(issue_cmd(tenant_id, invoice_id, lines)))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }

        let mut cmd = issue_cmd(tenant_id, invoice_id, vec![line(1, 1)]);
        cmd.due_date = d(2024, 2, 28);
        let err = invoice.handle(&InvoiceCommand::IssueInvoice(cmd)).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("due_date") => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cannot_pay_void_invoice() {
        let tenant_id = TenantId::new();
        let mut invoice = issued(tenant_id);
        let cmd = void(&invoice, tenant_id);
        execute(&mut invoice, &cmd).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Void);

        let err = invoice.handle(&pay(&invoice, tenant_id, 50)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg)
                if msg.contains("cannot register payment on void or fully paid invoice") => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cannot_overpay_invoice() {
        let tenant_id = TenantId::new();
        let invoice = issued(tenant_id);
        let err = invoice.handle(&pay(&invoice, tenant_id, 201)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("cannot overpay invoice") => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn paying_to_total_marks_invoice_paid() {
        let tenant_id = TenantId::new();
        let mut invoice = issued(tenant_id);

        let cmd = pay(&invoice, tenant_id, 50);
        execute(&mut invoice, &cmd).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert_eq!(invoice.outstanding_amount(), 150);

        let cmd = pay(&invoice, tenant_id, 150);
        execute(&mut invoice, &cmd).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert!(!invoice.can_accept_payment());
    }

    #[test]
    fn partially_paid_invoice_cannot_be_voided() {
        let tenant_id = TenantId::new();
        let mut invoice = issued(tenant_id);
        let cmd = pay(&invoice, tenant_id, 10);
        execute(&mut invoice, &cmd).unwrap();

        let err = invoice.handle(&void(&invoice, tenant_id)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("registered payments") => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn voiding_twice_is_a_conflict() {
        let tenant_id = TenantId::new();
        let mut invoice = issued(tenant_id);
        let cmd = void(&invoice, tenant_id);
        execute(&mut invoice, &cmd).unwrap();
        assert!(invoice.handle(&void(&invoice, tenant_id)).unwrap_err().is_conflict());
    }

    #[test]
    fn payments_on_unknown_invoices_are_not_found() {
        let invoice = Invoice::empty(InvoiceId::new(AggregateId::new()));
        let err = invoice.handle(&pay(&invoice, TenantId::new(), 1)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn schedule_run_ids_are_deterministic() {
        let tenant_id = TenantId::new();
        let schedule = RecurringInvoiceId::new(AggregateId::new());
        let a = InvoiceId::for_schedule_run(tenant_id, schedule, d(2024, 1, 31));
        let b = InvoiceId::for_schedule_run(tenant_id, schedule, d(2024, 1, 31));
        let c = InvoiceId::for_schedule_run(tenant_id, schedule, d(2024, 2, 29));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
