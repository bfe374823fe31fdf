//! Integration tests for the full event-sourced pipeline.
//!
//! Command -> EventStore -> EventBus -> projections + posting -> read models
//!
//! Verifies:
//! - Payroll and invoicing flows end up in a balanced ledger
//! - The recurring scheduler feeds invoices through the same pipeline
//! - Tenant isolation is preserved
//! - A rebuild from the store reproduces the live read models

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::{NaiveDate, Utc};
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use keel_accounting::{AccountCodes, ChartOfAccounts};
    use keel_core::{AggregateId, TenantId, UserId};
    use keel_events::{EventEnvelope, InMemoryEventBus};
    use keel_hr::{Employee, EmployeeCommand, EmployeeId, HireEmployee, SalaryPackage};
    use keel_invoicing::{
        CreateRecurringInvoice, CustomerRef, Invoice, InvoiceCommand, InvoiceId, InvoiceLine, InvoiceStatus,
        RecurrenceRule, RecurringInvoice, RecurringInvoiceCommand, RecurringInvoiceId, RegisterPayment,
    };
    use keel_payroll::{
        ApprovePayrollRun, CreatePayrollRun, PayPeriod, PayrollPolicy, PayrollRun, PayrollRunCommand, PayrollRunId,
        PayrollRunStatus,
    };

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::payroll::PayrollProcessor;
    use crate::posting::{PostingProcessor, payroll_entry_id};
    use crate::projections::employees::EMPLOYEE_AGGREGATE_TYPE;
    use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
    use crate::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE;
    use crate::projections::recurring_invoices::RECURRING_AGGREGATE_TYPE;
    use crate::projections::{
        AccountBalance, EmployeeReadModel, EmployeesProjection, InvoiceReadModel, InvoicesProjection,
        JournalEntryReadModel, LedgerProjection, PayrollRunReadModel, PayrollRunsProjection,
        RecurringInvoiceReadModel, RecurringInvoicesProjection,
    };
    use crate::read_model::InMemoryTenantStore;
    use crate::scheduler::RecurringScheduler;
    use crate::workers::{ProjectionWorker, WorkerHandle};

    type Store = Arc<InMemoryEventStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Mem<K, V> = Arc<InMemoryTenantStore<K, V>>;

    struct Pipeline {
        store: Store,
        dispatcher: Arc<CommandDispatcher<Store, Bus>>,
        employees: Arc<EmployeesProjection<Mem<EmployeeId, EmployeeReadModel>>>,
        payroll_runs: Arc<PayrollRunsProjection<Mem<PayPeriod, PayrollRunReadModel>>>,
        invoices: Arc<InvoicesProjection<Mem<InvoiceId, InvoiceReadModel>>>,
        schedules: Arc<RecurringInvoicesProjection<Mem<RecurringInvoiceId, RecurringInvoiceReadModel>>>,
        ledger: Arc<LedgerProjection<Mem<String, AccountBalance>, Mem<Uuid, JournalEntryReadModel>>>,
        chart: ChartOfAccounts,
        worker: Option<WorkerHandle>,
    }

    impl Pipeline {
        fn start() -> Self {
            let store: Store = Arc::new(InMemoryEventStore::new());
            let bus: Bus = Arc::new(InMemoryEventBus::new());
            let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));
            let chart = ChartOfAccounts::from_codes(&AccountCodes::default()).unwrap();

            let mut pipeline = Self {
                store,
                dispatcher: dispatcher.clone(),
                employees: Arc::new(EmployeesProjection::new(Arc::new(InMemoryTenantStore::new()))),
                payroll_runs: Arc::new(PayrollRunsProjection::new(Arc::new(InMemoryTenantStore::new()))),
                invoices: Arc::new(InvoicesProjection::new(Arc::new(InMemoryTenantStore::new()))),
                schedules: Arc::new(RecurringInvoicesProjection::new(Arc::new(InMemoryTenantStore::new()))),
                ledger: Arc::new(LedgerProjection::new(
                    Arc::new(InMemoryTenantStore::new()),
                    Arc::new(InMemoryTenantStore::new()),
                )),
                chart: chart.clone(),
                worker: None,
            };

            let employees = pipeline.employees.clone();
            let payroll_runs = pipeline.payroll_runs.clone();
            let invoices = pipeline.invoices.clone();
            let schedules = pipeline.schedules.clone();
            let ledger = pipeline.ledger.clone();
            let posting = PostingProcessor::new(dispatcher, chart);

            // Subscribes before returning, so nothing dispatched below is missed.
            let worker = ProjectionWorker::spawn("integration-pipeline", bus, None, move |env| {
                employees.apply_envelope(&env).map_err(|e| e.to_string())?;
                payroll_runs.apply_envelope(&env).map_err(|e| e.to_string())?;
                invoices.apply_envelope(&env).map_err(|e| e.to_string())?;
                schedules.apply_envelope(&env).map_err(|e| e.to_string())?;
                ledger.apply_envelope(&env).map_err(|e| e.to_string())?;
                posting.handle_envelope(&env).map_err(|e| e.to_string())?;
                Ok::<(), String>(())
            })
            .unwrap();
            pipeline.worker = Some(worker);
            pipeline
        }

        fn stop(mut self) {
            if let Some(w) = self.worker.take() {
                w.shutdown();
            }
        }

        fn hire(&self, tenant_id: TenantId, number: &str, basic: u64, hire_date: NaiveDate) -> EmployeeId {
            let employee_id = EmployeeId::new(AggregateId::new());
            self.dispatcher
                .dispatch(
                    tenant_id,
                    employee_id.0,
                    EMPLOYEE_AGGREGATE_TYPE,
                    EmployeeCommand::HireEmployee(HireEmployee {
                        tenant_id,
                        employee_id,
                        employee_number: number.to_string(),
                        full_name: format!("Employee {number}"),
                        email: None,
                        department: Some("Ops".to_string()),
                        hire_date,
                        salary: SalaryPackage {
                            basic,
                            housing: 50_000,
                            transport: 10_000,
                            other: 0,
                        },
                        occurred_at: Utc::now(),
                    }),
                    |_, id| Employee::empty(EmployeeId::new(id)),
                )
                .unwrap();
            employee_id
        }

        fn payroll(&self, tenant_id: TenantId, period: PayPeriod, cmd: PayrollRunCommand) {
            let run_id = PayrollRunId::for_period(tenant_id, period);
            self.dispatcher
                .dispatch(tenant_id, run_id.0, PAYROLL_RUN_AGGREGATE_TYPE, cmd, |_, id| {
                    PayrollRun::empty(PayrollRunId::new(id))
                })
                .unwrap();
        }

        /// Replays the store into fresh projections and returns their views.
        fn rebuilt_balances(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
            let fresh: LedgerProjection<Mem<String, AccountBalance>, Mem<Uuid, JournalEntryReadModel>> =
                LedgerProjection::new(Arc::new(InMemoryTenantStore::new()), Arc::new(InMemoryTenantStore::new()));
            let envelopes = self
                .store
                .load_tenant(tenant_id)
                .unwrap()
                .iter()
                .map(|e| e.to_envelope())
                .collect::<Vec<_>>();
            fresh.rebuild_from_scratch(envelopes).unwrap();
            fresh.balances(tenant_id)
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Poll until `check` holds; the pipeline is eventually consistent.
    fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn payroll_run_is_processed_approved_and_posted() {
        let p = Pipeline::start();
        let tenant_id = TenantId::new();
        let period = PayPeriod::new(2024, 3).unwrap();
        let run_id = PayrollRunId::for_period(tenant_id, period);

        p.hire(tenant_id, "E-1", 300_000, d(2023, 6, 1));
        p.hire(tenant_id, "E-2", 250_000, d(2024, 3, 11));
        eventually("employees", || p.employees.list(tenant_id).len() == 2);

        p.payroll(
            tenant_id,
            period,
            PayrollRunCommand::CreatePayrollRun(CreatePayrollRun {
                tenant_id,
                run_id,
                period,
                pay_date: d(2024, 3, 28),
                occurred_at: Utc::now(),
            }),
        );
        PayrollProcessor::new(p.dispatcher.clone(), p.employees.clone(), PayrollPolicy::default())
            .process(tenant_id, period, Utc::now())
            .unwrap();
        p.payroll(
            tenant_id,
            period,
            PayrollRunCommand::ApprovePayrollRun(ApprovePayrollRun {
                tenant_id,
                run_id,
                approved_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        eventually("run posted", || {
            p.payroll_runs
                .get(tenant_id, &period)
                .is_some_and(|r| r.status == PayrollRunStatus::Posted)
        });

        let run = p.payroll_runs.get(tenant_id, &period).unwrap();
        assert_eq!(run.totals.employee_count, 2);
        assert_eq!(
            run.journal_entry_id.map(|id| *id.as_uuid()),
            Some(payroll_entry_id(tenant_id, run_id))
        );

        eventually("ledger entry", || {
            p.ledger.entry(tenant_id, payroll_entry_id(tenant_id, run_id)).is_some()
        });
        let expense = p.ledger.balance(tenant_id, &p.chart.salary_expense.code).unwrap();
        assert_eq!(expense.balance, i128::from(run.totals.gross));
        let payable = p.ledger.balance(tenant_id, &p.chart.salaries_payable.code).unwrap();
        assert_eq!(payable.balance, -i128::from(run.totals.net));
        assert!(p.ledger.trial_balance(tenant_id).balanced);

        assert_eq!(p.rebuilt_balances(tenant_id), p.ledger.balances(tenant_id));
        p.stop();
    }

    #[test]
    fn scheduled_invoices_flow_into_receivables_and_cash() {
        let p = Pipeline::start();
        let tenant_id = TenantId::new();
        let schedule_id = RecurringInvoiceId::new(AggregateId::new());

        p.dispatcher
            .dispatch(
                tenant_id,
                schedule_id.0,
                RECURRING_AGGREGATE_TYPE,
                RecurringInvoiceCommand::CreateRecurringInvoice(CreateRecurringInvoice {
                    tenant_id,
                    schedule_id,
                    customer: CustomerRef {
                        customer_id: AggregateId::new(),
                        name: "Globex".to_string(),
                    },
                    lines: vec![InvoiceLine {
                        description: "Support plan".to_string(),
                        quantity: 2,
                        unit_price: 10_000,
                    }],
                    rule: RecurrenceRule::monthly_on(31),
                    start_date: d(2024, 1, 31),
                    end_date: None,
                    payment_terms_days: 10,
                    prorate: true,
                    occurred_at: Utc::now(),
                }),
                |_, id| RecurringInvoice::empty(RecurringInvoiceId::new(id)),
            )
            .unwrap();
        eventually("schedule", || p.schedules.get(tenant_id, &schedule_id).is_some());

        let scheduler = RecurringScheduler::new(p.dispatcher.clone(), p.schedules.clone(), 12);
        let report = scheduler.run_due(tenant_id, d(2024, 3, 15), Utc::now());
        assert_eq!(report.generated, 2);

        eventually("invoices", || p.invoices.for_schedule(tenant_id, schedule_id).len() == 2);
        eventually("receivables", || {
            p.ledger
                .balance(tenant_id, &p.chart.receivables.code)
                .is_some_and(|b| b.balance == 40_000)
        });

        let february = InvoiceId::for_schedule_run(tenant_id, schedule_id, d(2024, 2, 29));
        p.dispatcher
            .dispatch(
                tenant_id,
                february.0,
                INVOICE_AGGREGATE_TYPE,
                InvoiceCommand::RegisterPayment(RegisterPayment {
                    tenant_id,
                    invoice_id: february,
                    amount: 20_000,
                    paid_on: d(2024, 3, 5),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )
            .unwrap();

        eventually("payment", || {
            p.invoices
                .get(tenant_id, &february)
                .is_some_and(|i| i.status == InvoiceStatus::Paid)
        });
        eventually("cash", || {
            p.ledger
                .balance(tenant_id, &p.chart.cash.code)
                .is_some_and(|b| b.balance == 20_000)
        });

        // The January invoice was due Feb 10 and is still open.
        let overdue = p.invoices.overdue(tenant_id, d(2024, 3, 15));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].invoice.issue_date, d(2024, 1, 31));
        assert_eq!(overdue[0].days_overdue, 34);

        assert!(p.ledger.trial_balance(tenant_id).balanced);
        p.stop();
    }

    #[test]
    fn tenants_never_see_each_other() {
        let p = Pipeline::start();
        let a = TenantId::new();
        let b = TenantId::new();

        p.hire(a, "E-1", 100_000, d(2024, 1, 1));
        p.hire(b, "E-1", 200_000, d(2024, 1, 1));
        eventually("both tenants", || {
            p.employees.list(a).len() == 1 && p.employees.list(b).len() == 1
        });

        assert_eq!(p.employees.list(a)[0].current_salary.basic, 100_000);
        assert_eq!(p.employees.list(b)[0].current_salary.basic, 200_000);
        assert!(p.employees.find_by_number(a, "E-1").is_some());
        assert!(p.invoices.list(a).is_empty());

        let c = TenantId::new();
        assert!(p.employees.list(c).is_empty());
        p.stop();
    }
}
