//! Invoicing domain module (event-sourced).
//!
//! Invoices with payments, plus recurring invoice schedules that generate
//! invoices on a date-of-month cadence with rollover and proration.

pub mod customer;
pub mod invoice;
pub mod recurring;
pub mod schedule;

pub use customer::CustomerRef;
pub use invoice::{
    Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceIssued, InvoiceLine, InvoiceSource,
    InvoiceStatus, InvoiceVoided, IssueInvoice, PaymentRegistered, RegisterPayment, VoidInvoice,
};
pub use recurring::{
    CancelRecurringInvoice, CreateRecurringInvoice, InvoiceGenerated, PauseRecurringInvoice,
    RecordInvoiceGenerated, RecurringInvoice, RecurringInvoiceCancelled,
    RecurringInvoiceCommand, RecurringInvoiceCompleted, RecurringInvoiceCreated,
    RecurringInvoiceEvent, RecurringInvoiceId, RecurringInvoicePaused, RecurringInvoiceResumed,
    RecurringStatus, ResumeRecurringInvoice,
};
pub use schedule::{
    BillingRun, Frequency, Proration, RecurrenceRule, default_anchor, plan_first_run, plan_next_run,
};
