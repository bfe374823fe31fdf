//! Payroll domain module (event-sourced).
//!
//! A payroll run covers one calendar month for one tenant and materializes one
//! payslip per employee on the payroll during that month. Earnings are the
//! fixed salary components prorated by days worked; deductions are social
//! insurance and income tax computed from the tenant's policy.

pub mod payslip;
pub mod period;
pub mod policy;
pub mod run;

pub use payslip::{
    ComponentKind, PayrollEmployee, PayrollTotals, Payslip, PayslipLine, SalaryComponent,
    calculate_payslip,
};
pub use period::PayPeriod;
pub use policy::PayrollPolicy;
pub use run::{
    ApprovePayrollRun, CancelPayrollRun, CreatePayrollRun, MarkPayrollRunPosted,
    PayrollRun, PayrollRunApproved, PayrollRunCancelled, PayrollRunCommand, PayrollRunCreated,
    PayrollRunEvent, PayrollRunId, PayrollRunPosted, PayrollRunProcessed, PayrollRunStatus,
    ProcessPayrollRun,
};
