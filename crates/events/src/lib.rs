//! `keel-events`: event mechanics shared by every domain module.
//!
//! Nothing here knows about payroll, invoices or ledgers: it only defines what
//! an event is, how it travels (envelope + bus) and how an aggregate executes a
//! command in memory.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
