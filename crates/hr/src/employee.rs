use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use keel_core::calendar::overlap;
use keel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use keel_events::Event;

use crate::salary::{SalaryPackage, SalaryRevision, package_effective_on};

/// Employee identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub AggregateId);

impl EmployeeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Terminated,
}

/// Aggregate root: Employee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    id: EmployeeId,
    tenant_id: Option<TenantId>,
    employee_number: String,
    full_name: String,
    email: Option<String>,
    department: Option<String>,
    hire_date: Option<NaiveDate>,
    termination_date: Option<NaiveDate>,
    salary_history: Vec<SalaryRevision>,
    status: EmployeeStatus,
    version: u64,
    created: bool,
}

impl Employee {
    /// Not-yet-hired instance used for rehydration.
    pub fn empty(id: EmployeeId) -> Self {
        Self {
            id,
            tenant_id: None,
            employee_number: String::new(),
            full_name: String::new(),
            email: None,
            department: None,
            hire_date: None,
            termination_date: None,
            salary_history: Vec::new(),
            status: EmployeeStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EmployeeId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_hired(&self) -> bool {
        self.created
    }

    pub fn employee_number(&self) -> &str {
        &self.employee_number
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn department(&self) -> Option<&str> {
        self.department.as_deref()
    }

    pub fn hire_date(&self) -> Option<NaiveDate> {
        self.hire_date
    }

    pub fn termination_date(&self) -> Option<NaiveDate> {
        self.termination_date
    }

    pub fn status(&self) -> EmployeeStatus {
        self.status
    }

    pub fn salary_history(&self) -> &[SalaryRevision] {
        &self.salary_history
    }

    pub fn current_package(&self) -> Option<SalaryPackage> {
        self.salary_history.last().map(|r| r.package)
    }

    pub fn package_on(&self, date: NaiveDate) -> Option<SalaryPackage> {
        package_effective_on(&self.salary_history, date)
    }

    /// Days of `[start, end]` this employee was on the payroll.
    pub fn employed_during(&self, start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let hired = self.hire_date?;
        let left = self.termination_date.unwrap_or(NaiveDate::MAX);
        overlap((hired, left), (start, end))
    }
}

impl AggregateRoot for Employee {
    type Id = EmployeeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: HireEmployee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HireEmployee {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub employee_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub hire_date: NaiveDate,
    pub salary: SalaryPackage,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateEmployeeDetails. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEmployeeDetails {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeSalary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSalary {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub package: SalaryPackage,
    pub effective_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TerminateEmployee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateEmployee {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    /// Last day on the payroll (inclusive).
    pub termination_date: NaiveDate,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeCommand {
    HireEmployee(HireEmployee),
    UpdateEmployeeDetails(UpdateEmployeeDetails),
    ChangeSalary(ChangeSalary),
    TerminateEmployee(TerminateEmployee),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeHired {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub employee_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub hire_date: NaiveDate,
    pub salary: SalaryPackage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeDetailsUpdated {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryChanged {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub package: SalaryPackage,
    pub effective_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeTerminated {
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub termination_date: NaiveDate,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeEvent {
    EmployeeHired(EmployeeHired),
    EmployeeDetailsUpdated(EmployeeDetailsUpdated),
    SalaryChanged(SalaryChanged),
    EmployeeTerminated(EmployeeTerminated),
}

impl EmployeeEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            EmployeeEvent::EmployeeHired(e) => e.tenant_id,
            EmployeeEvent::EmployeeDetailsUpdated(e) => e.tenant_id,
            EmployeeEvent::SalaryChanged(e) => e.tenant_id,
            EmployeeEvent::EmployeeTerminated(e) => e.tenant_id,
        }
    }
}

impl Event for EmployeeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EmployeeEvent::EmployeeHired(_) => "hr.employee.hired",
            EmployeeEvent::EmployeeDetailsUpdated(_) => "hr.employee.details_updated",
            EmployeeEvent::SalaryChanged(_) => "hr.employee.salary_changed",
            EmployeeEvent::EmployeeTerminated(_) => "hr.employee.terminated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EmployeeEvent::EmployeeHired(e) => e.occurred_at,
            EmployeeEvent::EmployeeDetailsUpdated(e) => e.occurred_at,
            EmployeeEvent::SalaryChanged(e) => e.occurred_at,
            EmployeeEvent::EmployeeTerminated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Employee {
    type Command = EmployeeCommand;
    type Event = EmployeeEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EmployeeEvent::EmployeeHired(e) => {
                self.id = e.employee_id;
                self.tenant_id = Some(e.tenant_id);
                self.employee_number = e.employee_number.clone();
                self.full_name = e.full_name.clone();
                self.email = e.email.clone();
                self.department = e.department.clone();
                self.hire_date = Some(e.hire_date);
                self.salary_history = vec![SalaryRevision {
                    effective_date: e.hire_date,
                    package: e.salary,
                }];
                self.status = EmployeeStatus::Active;
                self.created = true;
            }
            EmployeeEvent::EmployeeDetailsUpdated(e) => {
                if let Some(name) = &e.full_name {
                    self.full_name = name.clone();
                }
                if let Some(email) = &e.email {
                    self.email = Some(email.clone());
                }
                if let Some(dept) = &e.department {
                    self.department = Some(dept.clone());
                }
            }
            EmployeeEvent::SalaryChanged(e) => {
                self.salary_history.push(SalaryRevision {
                    effective_date: e.effective_date,
                    package: e.package,
                });
            }
            EmployeeEvent::EmployeeTerminated(e) => {
                self.termination_date = Some(e.termination_date);
                self.status = EmployeeStatus::Terminated;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EmployeeCommand::HireEmployee(cmd) => self.handle_hire(cmd),
            EmployeeCommand::UpdateEmployeeDetails(cmd) => self.handle_update(cmd),
            EmployeeCommand::ChangeSalary(cmd) => self.handle_change_salary(cmd),
            EmployeeCommand::TerminateEmployee(cmd) => self.handle_terminate(cmd),
        }
    }
}

impl Employee {
    fn ensure_target(&self, tenant_id: TenantId, employee_id: EmployeeId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != employee_id {
            return Err(DomainError::invariant("employee_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.status == EmployeeStatus::Terminated {
            return Err(DomainError::invariant("employee is terminated"));
        }
        Ok(())
    }

    fn handle_hire(&self, cmd: &HireEmployee) -> Result<Vec<EmployeeEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("employee already exists"));
        }
        let employee_number = cmd.employee_number.trim();
        if employee_number.is_empty() {
            return Err(DomainError::validation("employee_number cannot be empty"));
        }
        let full_name = cmd.full_name.trim();
        if full_name.is_empty() {
            return Err(DomainError::validation("full_name cannot be empty"));
        }
        cmd.salary.validate()?;

        Ok(vec![EmployeeEvent::EmployeeHired(EmployeeHired {
            tenant_id: cmd.tenant_id,
            employee_id: cmd.employee_id,
            employee_number: employee_number.to_string(),
            full_name: full_name.to_string(),
            email: normalize_optional(&cmd.email),
            department: normalize_optional(&cmd.department),
            hire_date: cmd.hire_date,
            salary: cmd.salary,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateEmployeeDetails) -> Result<Vec<EmployeeEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.employee_id)?;
        self.ensure_active()?;

        if cmd.full_name.is_none() && cmd.email.is_none() && cmd.department.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }
        let full_name = match &cmd.full_name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("full_name cannot be empty"));
            }
            Some(n) => Some(n.trim().to_string()),
            None => None,
        };

        Ok(vec![EmployeeEvent::EmployeeDetailsUpdated(EmployeeDetailsUpdated {
            tenant_id: cmd.tenant_id,
            employee_id: cmd.employee_id,
            full_name,
            email: normalize_optional(&cmd.email),
            department: normalize_optional(&cmd.department),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_salary(&self, cmd: &ChangeSalary) -> Result<Vec<EmployeeEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.employee_id)?;
        self.ensure_active()?;
        cmd.package.validate()?;

        if let Some(hired) = self.hire_date {
            if cmd.effective_date < hired {
                return Err(DomainError::validation(
                    "salary change cannot take effect before the hire date",
                ));
            }
        }
        if let Some(last) = self.salary_history.last() {
            if cmd.effective_date <= last.effective_date {
                return Err(DomainError::invariant(format!(
                    "salary change must take effect after the latest revision ({})",
                    last.effective_date
                )));
            }
        }

        Ok(vec![EmployeeEvent::SalaryChanged(SalaryChanged {
            tenant_id: cmd.tenant_id,
            employee_id: cmd.employee_id,
            package: cmd.package,
            effective_date: cmd.effective_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_terminate(&self, cmd: &TerminateEmployee) -> Result<Vec<EmployeeEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.employee_id)?;
        if self.status == EmployeeStatus::Terminated {
            return Err(DomainError::conflict("employee is already terminated"));
        }
        if let Some(hired) = self.hire_date {
            if cmd.termination_date < hired {
                return Err(DomainError::validation(
                    "termination_date cannot precede the hire date",
                ));
            }
        }

        Ok(vec![EmployeeEvent::EmployeeTerminated(EmployeeTerminated {
            tenant_id: cmd.tenant_id,
            employee_id: cmd.employee_id,
            termination_date: cmd.termination_date,
            reason: normalize_optional(&cmd.reason),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize_optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
