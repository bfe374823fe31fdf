//! `keel-core`: domain foundation shared by every Keel module.
//!
//! Pure domain primitives only: identifiers, the error model, aggregate traits
//! and the calendar/money arithmetic that payroll and billing build on.

pub mod aggregate;
pub mod calendar;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
