use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use keel_core::TenantId;
use keel_events::{EventBus, EventEnvelope, Subscription};

use crate::workers::WorkerHandle;

/// Bus consumer that feeds committed events to a handler on its own thread.
///
/// Delivery is at-least-once, so the handler must be idempotent. Handler
/// errors are logged and the loop keeps going.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribes before returning, so no event published afterwards is missed.
    ///
    /// With `tenant_id` set, envelopes of other tenants are dropped.
    pub fn spawn<B, H, E>(
        name: &'static str,
        bus: B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
        H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<JsonValue>>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(env) => {
                if tenant_id.is_some_and(|t| env.tenant_id() != t) {
                    continue;
                }
                let event_type = env.event_type().to_string();
                if let Err(err) = handler(env) {
                    warn!(worker = name, event_type, error = ?err, "projection worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use chrono::Utc;
    use keel_core::AggregateId;
    use keel_events::InMemoryEventBus;
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            AggregateId::new(),
            "test.aggregate",
            1,
            "test.event",
            Utc::now(),
            JsonValue::Null,
        )
    }

    #[test]
    fn filters_by_tenant_and_stops_on_shutdown() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tenant_id = TenantId::new();

        let sink = seen.clone();
        let handle = ProjectionWorker::spawn("test-projection", bus.clone(), Some(tenant_id), move |env| {
            sink.lock().unwrap().push(env.tenant_id());
            Ok::<(), ()>(())
        })
        .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(tenant_id)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![tenant_id]);
    }
}
