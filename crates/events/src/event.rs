use chrono::{DateTime, Utc};

/// A domain event: an immutable, versioned fact.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. `"payroll.run.approved"`).
    fn event_type(&self) -> &'static str;

    /// Schema version of this event type.
    fn version(&self) -> u32;

    /// Business time at which the fact happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
