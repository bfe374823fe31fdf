//! Infrastructure layer: event store, dispatch, projections, background
//! processors and settings.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod payroll;
pub mod posting;
pub mod projections;
pub mod read_model;
pub mod scheduler;
pub mod workers;

#[cfg(test)]
mod integration_tests;
