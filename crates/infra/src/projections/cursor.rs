//! Per-stream checkpoints shared by every projection.
//!
//! A projection remembers the last sequence number it applied for each
//! `(tenant, aggregate)` stream:
//! - a sequence at or below the cursor is a redelivery and is skipped
//! - the next sequence must be exactly `cursor + 1`; anything else is a gap

use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use keel_core::{AggregateId, TenantId};
use keel_events::EventEnvelope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    cursors: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    /// `Ok(true)` when the envelope is the next one for its stream,
    /// `Ok(false)` when it was already applied.
    pub fn should_apply<E>(&self, envelope: &EventEnvelope<E>) -> Result<bool, ProjectionError> {
        let last = self.last(envelope.tenant_id(), envelope.aggregate_id());
        let found = envelope.sequence_number();
        if found == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found });
        }
        if found <= last {
            return Ok(false);
        }
        if found != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found });
        }
        Ok(true)
    }

    pub fn advance<E>(&self, envelope: &EventEnvelope<E>) {
        if let Ok(mut c) = self.cursors.write() {
            c.insert(
                (envelope.tenant_id(), envelope.aggregate_id()),
                envelope.sequence_number(),
            );
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut c) = self.cursors.write() {
            c.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

pub(crate) fn decode<E: DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

pub(crate) fn ensure_same_tenant(
    envelope: &EventEnvelope<JsonValue>,
    event_tenant: TenantId,
) -> Result<(), ProjectionError> {
    if envelope.tenant_id() != event_tenant {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    Ok(())
}

/// Sort envelopes into replay order and list the tenants they touch.
pub(crate) fn replay_order(
    envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
) -> (Vec<TenantId>, Vec<EventEnvelope<JsonValue>>) {
    let mut envs: Vec<_> = envelopes.into_iter().collect();
    envs.sort_by_key(|e| {
        (
            *e.tenant_id().as_uuid().as_bytes(),
            *e.aggregate_id().as_uuid().as_bytes(),
            e.sequence_number(),
        )
    });

    let mut tenants: Vec<TenantId> = envs.iter().map(|e| e.tenant_id()).collect();
    tenants.dedup();
    (tenants, envs)
}
