use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;

use keel_core::TenantId;
use keel_events::EventEnvelope;
use keel_hr::{EmployeeEvent, EmployeeId, EmployeeStatus, SalaryPackage, SalaryRevision};
use keel_payroll::PayrollEmployee;

use crate::projections::cursor::{ProjectionError, StreamCursors, decode, ensure_same_tenant, replay_order};
use crate::read_model::TenantStore;

pub const EMPLOYEE_AGGREGATE_TYPE: &str = "hr.employee";

/// Queryable employee record, including the full salary history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeReadModel {
    pub employee_id: EmployeeId,
    pub employee_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
    pub status: EmployeeStatus,
    pub current_salary: SalaryPackage,
    pub salary_history: Vec<SalaryRevision>,
}

impl EmployeeReadModel {
    pub fn to_payroll_employee(&self) -> PayrollEmployee {
        PayrollEmployee {
            employee_id: self.employee_id,
            employee_number: self.employee_number.clone(),
            full_name: self.full_name.clone(),
            hire_date: self.hire_date,
            termination_date: self.termination_date,
            salary_history: self.salary_history.clone(),
        }
    }

    /// Whether any day of `[start, end]` falls inside the employment.
    pub fn employed_during(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.hire_date <= end && self.termination_date.is_none_or(|t| t >= start)
    }
}

#[derive(Debug)]
pub struct EmployeesProjection<S>
where
    S: TenantStore<EmployeeId, EmployeeReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> EmployeesProjection<S>
where
    S: TenantStore<EmployeeId, EmployeeReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, employee_id: &EmployeeId) -> Option<EmployeeReadModel> {
        self.store.get(tenant_id, employee_id)
    }

    /// Sorted by employee number.
    pub fn list(&self, tenant_id: TenantId) -> Vec<EmployeeReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));
        all
    }

    pub fn find_by_number(&self, tenant_id: TenantId, employee_number: &str) -> Option<EmployeeReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|e| e.employee_number == employee_number)
    }

    /// Employees on the books at any point of `[start, end]`.
    pub fn employed_during(
        &self,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<EmployeeReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|e| e.employed_during(start, end))
            .collect()
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.store.tenants()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != EMPLOYEE_AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: EmployeeEvent = decode(envelope)?;
        ensure_same_tenant(envelope, ev.tenant_id())?;
        let tenant_id = envelope.tenant_id();

        match ev {
            EmployeeEvent::EmployeeHired(e) => {
                if e.employee_id.0 != envelope.aggregate_id() {
                    return Err(ProjectionError::TenantIsolation(
                        "event employee_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.store.upsert(
                    tenant_id,
                    e.employee_id,
                    EmployeeReadModel {
                        employee_id: e.employee_id,
                        employee_number: e.employee_number,
                        full_name: e.full_name,
                        email: e.email,
                        department: e.department,
                        hire_date: e.hire_date,
                        termination_date: None,
                        status: EmployeeStatus::Active,
                        current_salary: e.salary,
                        salary_history: vec![SalaryRevision {
                            effective_date: e.hire_date,
                            package: e.salary,
                        }],
                    },
                );
            }
            EmployeeEvent::EmployeeDetailsUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.employee_id) {
                    if let Some(name) = e.full_name {
                        rm.full_name = name;
                    }
                    if e.email.is_some() {
                        rm.email = e.email;
                    }
                    if e.department.is_some() {
                        rm.department = e.department;
                    }
                    self.store.upsert(tenant_id, e.employee_id, rm);
                }
            }
            EmployeeEvent::SalaryChanged(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.employee_id) {
                    rm.current_salary = e.package;
                    rm.salary_history.push(SalaryRevision {
                        effective_date: e.effective_date,
                        package: e.package,
                    });
                    self.store.upsert(tenant_id, e.employee_id, rm);
                }
            }
            EmployeeEvent::EmployeeTerminated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.employee_id) {
                    rm.termination_date = Some(e.termination_date);
                    rm.status = EmployeeStatus::Terminated;
                    self.store.upsert(tenant_id, e.employee_id, rm);
                }
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let (tenants, envs) = replay_order(envelopes);
        for t in tenants {
            self.store.clear_tenant(t);
            self.cursors.clear_tenant(t);
        }
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
