//! Infrastructure wiring: event store, bus, projections and background
//! processors behind one shared handle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use keel_accounting::ChartOfAccounts;
use keel_core::{Aggregate, AggregateId, DomainError, TenantId};
use keel_events::{EventEnvelope, InMemoryEventBus};
use keel_hr::EmployeeId;
use keel_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use keel_infra::config::Settings;
use keel_infra::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent};
use keel_infra::payroll::PayrollProcessor;
use keel_infra::posting::PostingProcessor;
use keel_infra::projections::{
    AccountBalance, EmployeeReadModel, EmployeesProjection, InvoiceReadModel, InvoicesProjection,
    JournalEntryReadModel, LedgerProjection, PayrollRunReadModel, PayrollRunsProjection,
    RecurringInvoiceReadModel, RecurringInvoicesProjection,
};
use keel_infra::read_model::InMemoryTenantStore;
use keel_infra::scheduler::RecurringScheduler;
use keel_infra::workers::{ProjectionWorker, SchedulerWorker, WorkerHandle};
use keel_invoicing::{InvoiceId, RecurringInvoiceId};
use keel_payroll::PayPeriod;

pub type Store = Arc<dyn EventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<Store, Bus>;

type Mem<K, V> = Arc<InMemoryTenantStore<K, V>>;
pub type Employees = EmployeesProjection<Mem<EmployeeId, EmployeeReadModel>>;
pub type PayrollRuns = PayrollRunsProjection<Mem<PayPeriod, PayrollRunReadModel>>;
pub type Invoices = InvoicesProjection<Mem<InvoiceId, InvoiceReadModel>>;
pub type Schedules = RecurringInvoicesProjection<Mem<RecurringInvoiceId, RecurringInvoiceReadModel>>;
pub type Ledger = LedgerProjection<Mem<String, AccountBalance>, Mem<Uuid, JournalEntryReadModel>>;
pub type Scheduler = RecurringScheduler<Store, Bus, Mem<RecurringInvoiceId, RecurringInvoiceReadModel>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("event store: {0}")]
    Store(#[from] EventStoreError),
    #[error("invalid chart of accounts: {0}")]
    Chart(DomainError),
    #[error("failed to start worker: {0}")]
    Worker(#[from] std::io::Error),
    #[error("database.url is set but the binary was built without the `postgres` feature")]
    PostgresDisabled,
}

/// Everything the handlers need. Read models are in memory and rebuilt from
/// the event store at startup.
pub struct AppServices {
    pub dispatcher: Arc<Dispatcher>,
    pub employees: Arc<Employees>,
    pub payroll_runs: Arc<PayrollRuns>,
    pub invoices: Arc<Invoices>,
    pub schedules: Arc<Schedules>,
    pub ledger: Arc<Ledger>,
    pub payroll: PayrollProcessor<Store, Bus, Mem<EmployeeId, EmployeeReadModel>>,
    pub scheduler: Arc<Scheduler>,
    pub chart: ChartOfAccounts,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices").finish_non_exhaustive()
    }
}

/// Pick the store from settings and wire everything around it.
pub async fn build_services(settings: &Settings) -> Result<Arc<AppServices>, ServicesError> {
    let store: Store = match settings.database.url.as_deref() {
        Some(url) => connect_postgres(url, settings.database.max_connections).await?,
        None => {
            info!("using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };
    AppServices::start(store, settings).map(Arc::new)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str, max_connections: u32) -> Result<Store, ServicesError> {
    let store = keel_infra::event_store::PostgresEventStore::connect(url, max_connections).await?;
    info!(max_connections, "using postgres event store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str, _max_connections: u32) -> Result<Store, ServicesError> {
    Err(ServicesError::PostgresDisabled)
}

impl AppServices {
    /// Subscribe the pipeline, rebuild read models from `store`, catch up on
    /// ledger postings and (when enabled) start the scheduler.
    pub fn start(store: Store, settings: &Settings) -> Result<Self, ServicesError> {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()));
        let chart = ChartOfAccounts::from_codes(&settings.accounts).map_err(ServicesError::Chart)?;

        let employees: Arc<Employees> = Arc::new(EmployeesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let payroll_runs: Arc<PayrollRuns> =
            Arc::new(PayrollRunsProjection::new(Arc::new(InMemoryTenantStore::new())));
        let invoices: Arc<Invoices> = Arc::new(InvoicesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let schedules: Arc<Schedules> =
            Arc::new(RecurringInvoicesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let ledger: Arc<Ledger> = Arc::new(LedgerProjection::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
        ));
        let posting = Arc::new(PostingProcessor::new(dispatcher.clone(), chart.clone()));

        let services = Self {
            payroll: PayrollProcessor::new(dispatcher.clone(), employees.clone(), settings.payroll),
            scheduler: Arc::new(RecurringScheduler::new(
                dispatcher.clone(),
                schedules.clone(),
                settings.scheduler.max_catch_up,
            )),
            dispatcher,
            employees,
            payroll_runs,
            invoices,
            schedules,
            ledger,
            chart,
            workers: Mutex::new(Vec::new()),
        };

        // Background subscriber: bus -> projections -> ledger posting.
        let pipeline = services.pipeline(posting.clone());
        let worker = ProjectionWorker::spawn("keel-pipeline", bus, None, move |env| pipeline.handle(&env))?;
        services.keep(worker);

        let history = services.rebuild()?;
        services.catch_up_postings(&posting, &history);

        if settings.scheduler.enabled {
            let worker = SchedulerWorker::spawn(
                services.scheduler.clone(),
                Duration::from_secs(settings.scheduler.interval_secs),
            )?;
            services.keep(worker);
        }
        Ok(services)
    }

    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: keel_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    /// Stop background workers and wait for them.
    pub fn shutdown(&self) {
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for w in workers {
            w.shutdown();
        }
    }

    fn keep(&self, worker: WorkerHandle) {
        match self.workers.lock() {
            Ok(mut w) => w.push(worker),
            Err(poisoned) => poisoned.into_inner().push(worker),
        }
    }

    fn pipeline(&self, posting: Arc<PostingProcessor<Store, Bus>>) -> Pipeline {
        Pipeline {
            employees: self.employees.clone(),
            payroll_runs: self.payroll_runs.clone(),
            invoices: self.invoices.clone(),
            schedules: self.schedules.clone(),
            ledger: self.ledger.clone(),
            posting,
        }
    }

    /// Replay every tenant's history into the read models.
    fn rebuild(&self) -> Result<Vec<EventEnvelope<JsonValue>>, ServicesError> {
        let store = self.dispatcher.store();
        let mut envelopes = Vec::new();
        for tenant_id in store.tenants()? {
            envelopes.extend(store.load_tenant(tenant_id)?.iter().map(StoredEvent::to_envelope));
        }
        if envelopes.is_empty() {
            return Ok(envelopes);
        }

        let rebuilds = [
            ("employees", self.employees.rebuild_from_scratch(envelopes.iter().cloned())),
            ("payroll_runs", self.payroll_runs.rebuild_from_scratch(envelopes.iter().cloned())),
            ("invoices", self.invoices.rebuild_from_scratch(envelopes.iter().cloned())),
            ("recurring_invoices", self.schedules.rebuild_from_scratch(envelopes.iter().cloned())),
            ("ledger", self.ledger.rebuild_from_scratch(envelopes.iter().cloned())),
        ];
        for (name, result) in rebuilds {
            if let Err(err) = result {
                warn!(projection = name, error = %err, "projection rebuild failed");
            }
        }
        info!(events = envelopes.len(), "read models rebuilt from event store");
        Ok(envelopes)
    }

    /// Post anything a previous process committed but never booked. Already
    /// booked facts come back as `AlreadyPosted`.
    fn catch_up_postings(&self, posting: &PostingProcessor<Store, Bus>, history: &[EventEnvelope<JsonValue>]) {
        for env in history {
            if let Err(err) = posting.handle_envelope(env) {
                warn!(event_type = env.event_type(), error = %err, "catch-up posting failed");
            }
        }
    }
}

struct Pipeline {
    employees: Arc<Employees>,
    payroll_runs: Arc<PayrollRuns>,
    invoices: Arc<Invoices>,
    schedules: Arc<Schedules>,
    ledger: Arc<Ledger>,
    posting: Arc<PostingProcessor<Store, Bus>>,
}

impl Pipeline {
    fn handle(&self, env: &EventEnvelope<JsonValue>) -> Result<(), String> {
        let applied = match env.aggregate_type() {
            keel_infra::projections::employees::EMPLOYEE_AGGREGATE_TYPE => self.employees.apply_envelope(env),
            keel_infra::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE => {
                self.payroll_runs.apply_envelope(env)
            }
            keel_infra::projections::invoices::INVOICE_AGGREGATE_TYPE => self.invoices.apply_envelope(env),
            keel_infra::projections::recurring_invoices::RECURRING_AGGREGATE_TYPE => {
                self.schedules.apply_envelope(env)
            }
            keel_infra::projections::ledger::LEDGER_AGGREGATE_TYPE => self.ledger.apply_envelope(env),
            _ => Ok(()),
        };
        applied.map_err(|e| format!("projection apply failed: {e}"))?;

        self.posting
            .handle_envelope(env)
            .map(|_| ())
            .map_err(|e| format!("posting failed: {e}"))
    }
}
