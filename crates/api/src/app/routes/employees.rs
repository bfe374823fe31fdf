use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use keel_auth::permissions::{EMPLOYEES_READ, EMPLOYEES_WRITE};
use keel_core::AggregateId;
use keel_hr::{
    ChangeSalary, Employee, EmployeeCommand, EmployeeId, HireEmployee, TerminateEmployee, UpdateEmployeeDetails,
};
use keel_infra::projections::employees::EMPLOYEE_AGGREGATE_TYPE;
use keel_infra::event_store::StoredEvent;
use keel_infra::read_model::{Page, Pagination};

use crate::app::routes::common::{CmdAuth, authorize, guard};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(hire_employee).get(list_employees))
        .route("/:id", get(get_employee).patch(update_employee))
        .route("/:id/salary", post(change_salary))
        .route("/:id/terminate", post(terminate_employee))
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    employee_id: EmployeeId,
    cmd: EmployeeCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd_auth = CmdAuth::new(cmd, &[EMPLOYEES_WRITE]);
    authorize(tenant, principal, &cmd_auth)?;

    services
        .dispatch(
            tenant.tenant_id(),
            employee_id.0,
            EMPLOYEE_AGGREGATE_TYPE,
            cmd_auth.inner,
            |_t, id| Employee::empty(EmployeeId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn hire_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::HireEmployeeRequest>,
) -> Response {
    // Best effort: two concurrent hires with one number can both pass.
    if services
        .employees
        .find_by_number(tenant.tenant_id(), &body.employee_number)
        .is_some()
    {
        return errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("employee number {} is already in use", body.employee_number),
        );
    }

    let agg = AggregateId::new();
    let employee_id = EmployeeId::new(agg);
    let cmd = EmployeeCommand::HireEmployee(HireEmployee {
        tenant_id: tenant.tenant_id(),
        employee_id,
        employee_number: body.employee_number,
        full_name: body.full_name,
        email: body.email,
        department: body.department,
        hire_date: body.hire_date,
        salary: body.salary,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, &principal, employee_id, cmd) {
        Ok(committed) => dto::created(agg, &committed),
        Err(resp) => resp,
    }
}

pub async fn list_employees(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::EmployeeListQuery>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &EMPLOYEES_READ) {
        return resp;
    }
    let all: Vec<_> = services
        .employees
        .list(tenant.tenant_id())
        .into_iter()
        .filter(|e| q.status.is_none_or(|s| e.status == s))
        .collect();
    Json(Page::slice(all, Pagination::new(q.limit, q.offset))).into_response()
}

pub async fn get_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = guard(&tenant, &principal, &EMPLOYEES_READ) {
        return resp;
    }
    let agg = match errors::parse_id(&id, "employee") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.employees.get(tenant.tenant_id(), &EmployeeId::new(agg)) {
        Some(rm) => Json(rm).into_response(),
        None => errors::not_found("employee"),
    }
}

pub async fn update_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateEmployeeRequest>,
) -> Response {
    let employee_id = match errors::parse_id(&id, "employee") {
        Ok(v) => EmployeeId::new(v),
        Err(resp) => return resp,
    };
    let cmd = EmployeeCommand::UpdateEmployeeDetails(UpdateEmployeeDetails {
        tenant_id: tenant.tenant_id(),
        employee_id,
        full_name: body.full_name,
        email: body.email,
        department: body.department,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, employee_id, cmd) {
        Ok(committed) => dto::accepted(employee_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn change_salary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeSalaryRequest>,
) -> Response {
    let employee_id = match errors::parse_id(&id, "employee") {
        Ok(v) => EmployeeId::new(v),
        Err(resp) => return resp,
    };
    let cmd = EmployeeCommand::ChangeSalary(ChangeSalary {
        tenant_id: tenant.tenant_id(),
        employee_id,
        package: body.salary,
        effective_date: body.effective_date,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, employee_id, cmd) {
        Ok(committed) => dto::accepted(employee_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn terminate_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TerminateEmployeeRequest>,
) -> Response {
    let employee_id = match errors::parse_id(&id, "employee") {
        Ok(v) => EmployeeId::new(v),
        Err(resp) => return resp,
    };
    let cmd = EmployeeCommand::TerminateEmployee(TerminateEmployee {
        tenant_id: tenant.tenant_id(),
        employee_id,
        termination_date: body.termination_date,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    match run(&services, &tenant, &principal, employee_id, cmd) {
        Ok(committed) => dto::accepted(employee_id, &committed),
        Err(resp) => resp,
    }
}
