use std::collections::BTreeMap;
use std::sync::RwLock;

use keel_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, batch_stream};

type StreamKey = (TenantId, AggregateId);

/// In-memory append-only event store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    // Ordered by stream so `load_tenant` is deterministic.
    streams: RwLock<BTreeMap<(u128, u128), (StreamKey, Vec<StoredEvent>)>>,
}

fn ordering_key(tenant_id: TenantId, aggregate_id: AggregateId) -> (u128, u128) {
    (tenant_id.as_uuid().as_u128(), aggregate_id.as_uuid().as_u128())
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    pub fn event_count(&self) -> usize {
        self.streams
            .read()
            .map(|s| s.values().map(|(_, events)| events.len()).sum())
            .unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let (tenant_id, aggregate_id, aggregate_type) = batch_stream(&events)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let (_, stream) = streams
            .entry(ordering_key(tenant_id, aggregate_id))
            .or_insert_with(|| ((tenant_id, aggregate_id), Vec::new()));
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams
            .get(&ordering_key(tenant_id, aggregate_id))
            .map(|(_, events)| events.clone())
            .unwrap_or_default())
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams
            .values()
            .filter(|((t, _), _)| *t == tenant_id)
            .flat_map(|(_, events)| events.iter().cloned())
            .collect())
    }

    fn tenants(&self) -> Result<Vec<TenantId>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let mut tenants: Vec<TenantId> = streams.values().map(|((t, _), _)| *t).collect();
        tenants.dedup();
        Ok(tenants)
    }
}
