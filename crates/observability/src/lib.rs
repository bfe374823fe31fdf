//! Process-wide tracing setup shared by the binaries and tests.

pub mod tracing;

pub use crate::tracing::{LogFormat, init};
