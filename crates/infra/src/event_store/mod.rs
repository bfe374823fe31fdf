//! Append-only event store boundary.
//!
//! Tenant-scoped event streams behind a storage-agnostic trait, with an
//! in-memory backend and (feature `postgres`) a PostgreSQL backend.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
