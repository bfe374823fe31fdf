//! Read model builders.
//!
//! Every projection here is:
//! - **Rebuildable** from the tenant's event streams (`rebuild_from_scratch`)
//! - **Tenant-isolated**: records live in per-tenant partitions and payloads
//!   must carry the envelope's tenant
//! - **Idempotent**: redelivered envelopes are skipped by per-stream cursors

pub mod cursor;
pub mod employees;
pub mod invoices;
pub mod ledger;
pub mod payroll_runs;
pub mod recurring_invoices;

pub use cursor::{ProjectionError, StreamCursors};
pub use employees::{EmployeeReadModel, EmployeesProjection};
pub use invoices::{InvoiceReadModel, InvoicesProjection, OverdueInvoice};
pub use ledger::{AccountBalance, JournalEntryReadModel, LedgerProjection, TrialBalance, TrialBalanceLine};
pub use payroll_runs::{PayrollRunReadModel, PayrollRunsProjection};
pub use recurring_invoices::{RecurringInvoiceReadModel, RecurringInvoicesProjection};
