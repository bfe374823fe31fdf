use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use keel_events::{EventBus, EventEnvelope};
use keel_invoicing::RecurringInvoiceId;

use crate::event_store::EventStore;
use crate::projections::recurring_invoices::RecurringInvoiceReadModel;
use crate::read_model::TenantStore;
use crate::scheduler::RecurringScheduler;
use crate::workers::WorkerHandle;

/// Runs the recurring scheduler for every tenant on a fixed interval.
///
/// The first pass happens right after spawning.
#[derive(Debug)]
pub struct SchedulerWorker;

impl SchedulerWorker {
    pub fn spawn<S, B, R>(
        scheduler: Arc<RecurringScheduler<S, B, R>>,
        interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: EventStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
        R: TenantStore<RecurringInvoiceId, RecurringInvoiceReadModel> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("recurring-scheduler".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "recurring scheduler started");
                loop {
                    let now = Utc::now();
                    let report = scheduler.run_all(now.date_naive(), now);
                    if report.generated > 0 || report.failed > 0 {
                        info!(
                            generated = report.generated,
                            failed = report.failed,
                            deferred = report.deferred,
                            "scheduler tick"
                        );
                    }

                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("recurring scheduler stopped");
            })?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}
