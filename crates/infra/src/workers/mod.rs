//! Background threads: bus consumers and the recurring invoice timer.

use std::sync::mpsc;
use std::thread;

pub mod projection_worker;
pub mod scheduler_worker;

pub use projection_worker::ProjectionWorker;
pub use scheduler_worker::SchedulerWorker;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
