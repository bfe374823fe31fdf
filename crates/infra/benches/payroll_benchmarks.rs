use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use keel_core::{AggregateId, TenantId};
use keel_events::{EventEnvelope, InMemoryEventBus};
use keel_hr::{EmployeeId, SalaryPackage, SalaryRevision};
use keel_infra::command_dispatcher::CommandDispatcher;
use keel_infra::event_store::{EventStore, InMemoryEventStore};
use keel_infra::projections::ledger::LEDGER_AGGREGATE_TYPE;
use keel_infra::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE;
use keel_infra::projections::LedgerProjection;
use keel_infra::read_model::InMemoryTenantStore;
use keel_accounting::{
    ChartOfAccounts, JournalCommand, JournalEntryLine, Ledger, LedgerId, PostJournalEntry,
};
use keel_payroll::{
    CreatePayrollRun, PayPeriod, PayrollEmployee, PayrollPolicy, PayrollRun, PayrollRunCommand,
    PayrollRunId, ProcessPayrollRun, calculate_payslip,
};

type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// A workforce with a mix of full months, mid-month hires and a salary change.
fn workforce(size: usize) -> Vec<PayrollEmployee> {
    (0..size)
        .map(|i| {
            let hire_date = if i % 5 == 0 { d(2024, 3, 11) } else { d(2022, 1, 1) };
            let package = SalaryPackage {
                basic: 250_000 + (i as u64 % 7) * 10_000,
                housing: 60_000,
                transport: 15_000,
                other: if i % 3 == 0 { 5_000 } else { 0 },
            };
            let mut salary_history = vec![SalaryRevision {
                effective_date: hire_date,
                package,
            }];
            if i % 4 == 0 && hire_date < d(2024, 3, 1) {
                salary_history.push(SalaryRevision {
                    effective_date: d(2024, 3, 15),
                    package: SalaryPackage {
                        basic: package.basic + 20_000,
                        ..package
                    },
                });
            }
            PayrollEmployee {
                employee_id: EmployeeId::new(AggregateId::new()),
                employee_number: format!("E-{i:05}"),
                full_name: format!("Employee {i}"),
                hire_date,
                termination_date: (i % 11 == 0).then(|| d(2024, 3, 20)),
                salary_history,
            }
        })
        .collect()
}

fn setup() -> (Dispatcher, TenantId) {
    let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()));
    (dispatcher, TenantId::new())
}

fn bench_payslip_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("payslip_calculation");
    let period = PayPeriod::new(2024, 3).unwrap();
    let policy = PayrollPolicy::default();
    let employees = workforce(64);

    group.throughput(Throughput::Elements(employees.len() as u64));
    group.bench_function("calculate_64", |b| {
        b.iter(|| {
            for e in &employees {
                black_box(calculate_payslip(black_box(e), period, &policy).unwrap());
            }
        });
    });
    group.finish();
}

fn bench_process_payroll_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_payroll_run");
    group.sample_size(20);
    let period = PayPeriod::new(2024, 3).unwrap();

    for size in [10usize, 100, 1000] {
        let employees = workforce(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("employees", size), &employees, |b, employees| {
            b.iter(|| {
                // A fresh tenant per iteration so every run starts in draft.
                let (dispatcher, tenant_id) = setup();
                let run_id = PayrollRunId::for_period(tenant_id, period);
                dispatcher
                    .dispatch(
                        tenant_id,
                        run_id.0,
                        PAYROLL_RUN_AGGREGATE_TYPE,
                        PayrollRunCommand::CreatePayrollRun(CreatePayrollRun {
                            tenant_id,
                            run_id,
                            period,
                            pay_date: d(2024, 3, 28),
                            occurred_at: Utc::now(),
                        }),
                        |_, id| PayrollRun::empty(PayrollRunId::new(id)),
                    )
                    .unwrap();
                dispatcher
                    .dispatch(
                        tenant_id,
                        run_id.0,
                        PAYROLL_RUN_AGGREGATE_TYPE,
                        PayrollRunCommand::ProcessPayrollRun(ProcessPayrollRun {
                            tenant_id,
                            run_id,
                            employees: employees.clone(),
                            policy: PayrollPolicy::default(),
                            occurred_at: Utc::now(),
                        }),
                        |_, id| PayrollRun::empty(PayrollRunId::new(id)),
                    )
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_ledger_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_rebuild");
    let chart = ChartOfAccounts::standard();

    for entries in [100usize, 1000] {
        let (dispatcher, tenant_id) = setup();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        for i in 0..entries {
            let amount = 1_000 + i as u64;
            dispatcher
                .dispatch(
                    tenant_id,
                    ledger_id.0,
                    LEDGER_AGGREGATE_TYPE,
                    JournalCommand::PostJournalEntry(PostJournalEntry {
                        tenant_id,
                        ledger_id,
                        entry_id: uuid::Uuid::now_v7(),
                        entry_date: d(2024, 3, 1),
                        lines: vec![
                            JournalEntryLine::debit(&chart.receivables, amount),
                            JournalEntryLine::credit(&chart.revenue, amount),
                        ],
                        description: None,
                        source: None,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| Ledger::empty(LedgerId::new(id)),
                )
                .unwrap();
        }
        let envelopes: Vec<_> = dispatcher
            .store()
            .load_tenant(tenant_id)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::new("entries", entries), &envelopes, |b, envelopes| {
            b.iter(|| {
                let projection = LedgerProjection::new(
                    Arc::new(InMemoryTenantStore::new()),
                    Arc::new(InMemoryTenantStore::new()),
                );
                projection.rebuild_from_scratch(envelopes.iter().cloned()).unwrap();
                black_box(projection.trial_balance(tenant_id));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_payslip_calculation,
    bench_process_payroll_run,
    bench_ledger_rebuild
);
criterion_main!(benches);
