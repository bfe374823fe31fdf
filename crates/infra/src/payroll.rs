//! Payroll processing: feeds employee data into a payroll run.
//!
//! The run aggregate is pure and cannot see employees, so this component
//! gathers everyone on the books during the period from the employee read
//! model and hands the snapshot to `ProcessPayrollRun`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use keel_core::TenantId;
use keel_events::{EventBus, EventEnvelope};
use keel_hr::EmployeeId;
use keel_payroll::{
    PayPeriod, PayrollEmployee, PayrollPolicy, PayrollRun, PayrollRunCommand, PayrollRunId, ProcessPayrollRun,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::employees::{EmployeeReadModel, EmployeesProjection};
use crate::projections::payroll_runs::PAYROLL_RUN_AGGREGATE_TYPE;
use crate::read_model::TenantStore;

pub struct PayrollProcessor<S, B, E>
where
    E: TenantStore<EmployeeId, EmployeeReadModel>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    employees: Arc<EmployeesProjection<E>>,
    policy: PayrollPolicy,
}

impl<S, B, E> PayrollProcessor<S, B, E>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    E: TenantStore<EmployeeId, EmployeeReadModel>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        employees: Arc<EmployeesProjection<E>>,
        policy: PayrollPolicy,
    ) -> Self {
        Self {
            dispatcher,
            employees,
            policy,
        }
    }

    pub fn policy(&self) -> PayrollPolicy {
        self.policy
    }

    /// Snapshot of every employee employed at some point in `period`.
    pub fn payroll_employees(&self, tenant_id: TenantId, period: PayPeriod) -> Vec<PayrollEmployee> {
        self.employees
            .employed_during(tenant_id, period.start(), period.end())
            .iter()
            .map(EmployeeReadModel::to_payroll_employee)
            .collect()
    }

    /// Calculate (or recalculate) the payslips of the tenant's run for `period`.
    pub fn process(
        &self,
        tenant_id: TenantId,
        period: PayPeriod,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let run_id = PayrollRunId::for_period(tenant_id, period);
        let employees = self.payroll_employees(tenant_id, period);
        let candidates = employees.len();

        let committed = self.dispatcher.dispatch(
            tenant_id,
            run_id.0,
            PAYROLL_RUN_AGGREGATE_TYPE,
            PayrollRunCommand::ProcessPayrollRun(ProcessPayrollRun {
                tenant_id,
                run_id,
                employees,
                policy: self.policy,
                occurred_at,
            }),
            |_, id| PayrollRun::empty(PayrollRunId::new(id)),
        )?;

        info!(tenant_id = %tenant_id, period = %period, candidates, "payroll run processed");
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;
    use keel_core::AggregateId;
    use keel_events::InMemoryEventBus;
    use keel_hr::{Employee, EmployeeCommand, HireEmployee, SalaryPackage, TerminateEmployee};
    use keel_payroll::{CreatePayrollRun, PayrollRunStatus};

    use crate::event_store::InMemoryEventStore;
    use crate::projections::employees::EMPLOYEE_AGGREGATE_TYPE;
    use crate::read_model::InMemoryTenantStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn employee_cmd(
        dispatcher: &Dispatcher,
        projection: &EmployeesProjection<Arc<InMemoryTenantStore<EmployeeId, EmployeeReadModel>>>,
        tenant_id: TenantId,
        employee_id: EmployeeId,
        cmd: EmployeeCommand,
    ) {
        let committed = dispatcher
            .dispatch(tenant_id, employee_id.0, EMPLOYEE_AGGREGATE_TYPE, cmd, |_, id| {
                Employee::empty(EmployeeId::new(id))
            })
            .unwrap();
        for e in committed {
            projection.apply_envelope(&e.to_envelope()).unwrap();
        }
    }

    fn hire(number: &str, hire_date: NaiveDate, tenant_id: TenantId, employee_id: EmployeeId) -> EmployeeCommand {
        EmployeeCommand::HireEmployee(HireEmployee {
            tenant_id,
            employee_id,
            employee_number: number.to_string(),
            full_name: format!("Employee {number}"),
            email: None,
            department: None,
            hire_date,
            salary: SalaryPackage {
                basic: 310_000,
                housing: 0,
                transport: 0,
                other: 0,
            },
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn processes_everyone_employed_during_the_period() {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        let employees = Arc::new(EmployeesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let processor = PayrollProcessor::new(dispatcher.clone(), employees.clone(), PayrollPolicy::default());

        let tenant_id = TenantId::new();
        let staying = EmployeeId::new(AggregateId::new());
        let leaving = EmployeeId::new(AggregateId::new());
        let left_before = EmployeeId::new(AggregateId::new());

        employee_cmd(&dispatcher, &employees, tenant_id, staying, hire("E-1", d(2023, 1, 1), tenant_id, staying));
        employee_cmd(&dispatcher, &employees, tenant_id, leaving, hire("E-2", d(2023, 1, 1), tenant_id, leaving));
        employee_cmd(&dispatcher, &employees, tenant_id, left_before, hire("E-3", d(2023, 1, 1), tenant_id, left_before));
        employee_cmd(
            &dispatcher,
            &employees,
            tenant_id,
            leaving,
            EmployeeCommand::TerminateEmployee(TerminateEmployee {
                tenant_id,
                employee_id: leaving,
                termination_date: d(2024, 3, 15),
                reason: None,
                occurred_at: Utc::now(),
            }),
        );
        employee_cmd(
            &dispatcher,
            &employees,
            tenant_id,
            left_before,
            EmployeeCommand::TerminateEmployee(TerminateEmployee {
                tenant_id,
                employee_id: left_before,
                termination_date: d(2024, 2, 29),
                reason: None,
                occurred_at: Utc::now(),
            }),
        );

        let period = PayPeriod::new(2024, 3).unwrap();
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
                    pay_date: d(2024, 3, 31),
                    occurred_at: Utc::now(),
                }),
                |_, id| PayrollRun::empty(PayrollRunId::new(id)),
            )
            .unwrap();

        processor.process(tenant_id, period, Utc::now()).unwrap();

        let run: PayrollRun = dispatcher
            .load(tenant_id, run_id.0, |_, id| PayrollRun::empty(PayrollRunId::new(id)))
            .unwrap();
        assert_eq!(run.status(), PayrollRunStatus::Processed);
        assert_eq!(run.payslips().len(), 2);
        assert_eq!(run.totals().employee_count, 2);

        let leaver = run
            .payslips()
            .iter()
            .find(|p| p.employee_id == leaving)
            .unwrap();
        assert_eq!(leaver.days_worked, 15);
        // 310_000 * 15 / 31
        assert_eq!(leaver.gross, 150_000);
    }

    #[test]
    fn processing_without_a_run_is_not_found() {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        let employees = Arc::new(EmployeesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let processor = PayrollProcessor::new(dispatcher, employees, PayrollPolicy::default());

        let err = processor
            .process(TenantId::new(), PayPeriod::new(2024, 3).unwrap(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }
}
