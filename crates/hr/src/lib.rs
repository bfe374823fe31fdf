//! HR domain module (event-sourced).
//!
//! Employees and their salary history. Payroll reads this history; it never
//! writes to it.

pub mod employee;
pub mod salary;

pub use employee::{
    ChangeSalary, Employee, EmployeeCommand, EmployeeDetailsUpdated, EmployeeEvent,
    EmployeeHired, EmployeeId, EmployeeStatus, EmployeeTerminated, HireEmployee, SalaryChanged,
    TerminateEmployee, UpdateEmployeeDetails,
};
pub use salary::{SalaryPackage, SalaryRevision, package_effective_on};
