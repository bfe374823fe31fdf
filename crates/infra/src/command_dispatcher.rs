//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   -> load stream (tenant-scoped) and validate it
//!   -> rehydrate aggregate
//!   -> handle (pure decision)
//!   -> append with ExpectedVersion::Exact(loaded version)
//!   -> publish committed envelopes
//! ```
//!
//! Publication happens only after a successful append, so a failed publish
//! never loses events; delivery is at-least-once.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use keel_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use keel_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// The aggregate rejected the command as a duplicate or replay.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    /// Historical payload no longer matches the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Events were appended but could not be published.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Conflicts of either kind: stale version or duplicate command.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_) | DispatchError::Conflict(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            EventStoreError::Publish(msg) => DispatchError::Publish(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine.
///
/// Generic over the store and the bus so tests run entirely in memory and the
/// binary can swap in Postgres without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run one command against one aggregate.
    ///
    /// `make_aggregate` builds the empty instance that history is replayed
    /// into. Returns the committed events (empty when the aggregate decided
    /// nothing).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: keel_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();

        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command).map_err(|err| {
            debug!(
                tenant_id = %tenant_id,
                aggregate_id = %aggregate_id,
                aggregate_type = %aggregate_type,
                error = %err,
                "command rejected"
            );
            DispatchError::from(err)
        })?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        debug!(
            tenant_id = %tenant_id,
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            version = stream_version(&committed),
            "command committed"
        );
        Ok(committed)
    }

    /// Like [`dispatch`](Self::dispatch), re-running the whole pipeline when
    /// the append loses an optimistic concurrency race.
    ///
    /// Only stale-version failures are retried; a domain conflict is final.
    pub fn dispatch_with_retry<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
        max_attempts: u32,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Clone,
        A::Event: keel_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.dispatch(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command.clone(),
                &make_aggregate,
            ) {
                Err(DispatchError::Concurrency(msg)) if attempt < max_attempts => {
                    warn!(
                        tenant_id = %tenant_id,
                        aggregate_id = %aggregate_id,
                        attempt,
                        reason = %msg,
                        "retrying command after concurrency conflict"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Rehydrate an aggregate without running a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Re-check isolation even though the store filtered by tenant.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use keel_events::InMemoryEventBus;
    use keel_hr::{
        Employee, EmployeeCommand, EmployeeId, HireEmployee, SalaryPackage, TerminateEmployee,
    };

    use crate::event_store::InMemoryEventStore;

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn hire(tenant_id: TenantId, employee_id: EmployeeId) -> EmployeeCommand {
        EmployeeCommand::HireEmployee(HireEmployee {
            tenant_id,
            employee_id,
            employee_number: "E-001".into(),
            full_name: "Ada Lovelace".into(),
            email: None,
            department: None,
            hire_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            salary: SalaryPackage {
                basic: 500_000,
                ..SalaryPackage::default()
            },
            occurred_at: Utc::now(),
        })
    }

    fn make_employee(_: TenantId, id: AggregateId) -> Employee {
        Employee::empty(EmployeeId::new(id))
    }

    #[test]
    fn dispatch_appends_and_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let employee_id = EmployeeId::new(AggregateId::new());

        let committed = d
            .dispatch(tenant_id, employee_id.0, "hr.employee", hire(tenant_id, employee_id), make_employee)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);

        let env = sub.try_recv().unwrap();
        assert_eq!(env.event_type(), "hr.employee.hired");
        assert_eq!(env.tenant_id(), tenant_id);
    }

    #[test]
    fn domain_conflict_is_not_a_concurrency_error() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let employee_id = EmployeeId::new(AggregateId::new());

        d.dispatch(tenant_id, employee_id.0, "hr.employee", hire(tenant_id, employee_id), make_employee)
            .unwrap();
        let err = d
            .dispatch_with_retry(
                tenant_id,
                employee_id.0,
                "hr.employee",
                hire(tenant_id, employee_id),
                make_employee,
                3,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(err.is_conflict());
    }

    #[test]
    fn other_tenant_sees_an_empty_stream() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let employee_id = EmployeeId::new(AggregateId::new());
        d.dispatch(tenant_id, employee_id.0, "hr.employee", hire(tenant_id, employee_id), make_employee)
            .unwrap();

        let intruder = TenantId::new();
        let err = d
            .dispatch(
                intruder,
                employee_id.0,
                "hr.employee",
                EmployeeCommand::TerminateEmployee(TerminateEmployee {
                    tenant_id: intruder,
                    employee_id,
                    termination_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                    reason: None,
                    occurred_at: Utc::now(),
                }),
                make_employee,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }

    #[test]
    fn load_rehydrates_current_state() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let employee_id = EmployeeId::new(AggregateId::new());
        d.dispatch(tenant_id, employee_id.0, "hr.employee", hire(tenant_id, employee_id), make_employee)
            .unwrap();

        let employee: Employee = d.load(tenant_id, employee_id.0, make_employee).unwrap();
        assert!(employee.is_hired());
        assert_eq!(employee.full_name(), "Ada Lovelace");
    }
}
