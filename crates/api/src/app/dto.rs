use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use keel_accounting::{Account, ChartOfAccounts, JournalEntryLine};
use keel_hr::{EmployeeStatus, SalaryPackage};
use keel_infra::read_model::Pagination;
use keel_infra::event_store::StoredEvent;
use keel_invoicing::{CustomerRef, Frequency, InvoiceLine, InvoiceStatus, RecurringStatus};
use keel_payroll::PayPeriod;

use crate::app::errors;

/// Applied when a request names neither a due date nor payment terms.
pub const DEFAULT_PAYMENT_TERMS_DAYS: u32 = 30;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct HireEmployeeRequest {
    pub employee_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub hire_date: NaiveDate,
    pub salary: SalaryPackage,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeSalaryRequest {
    pub effective_date: NaiveDate,
    pub salary: SalaryPackage,
}

#[derive(Debug, Deserialize)]
pub struct TerminateEmployeeRequest {
    pub termination_date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePayrollRunRequest {
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
}

/// Body of cancel and void actions.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueInvoiceRequest {
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    /// Defaults to today.
    pub issue_date: Option<NaiveDate>,
    /// Defaults to `issue_date + payment_terms_days`.
    pub due_date: Option<NaiveDate>,
    pub payment_terms_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: u64,
    pub paid_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecurringInvoiceRequest {
    pub customer: CustomerRef,
    pub lines: Vec<InvoiceLine>,
    pub frequency: Option<Frequency>,
    pub interval: Option<u32>,
    /// Defaults to the start date's day of month.
    pub anchor_day: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payment_terms_days: Option<u32>,
    pub prorate: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRecurringInvoiceRequest {
    pub resume_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

#[derive(Debug, Deserialize)]
pub struct JournalLineRequest {
    pub account_code: String,
    /// Required for accounts outside the configured chart.
    pub account_name: Option<String>,
    pub kind: Option<String>,
    pub amount: u64,
    pub side: Side,
}

#[derive(Debug, Deserialize)]
pub struct PostJournalEntryRequest {
    pub entry_date: NaiveDate,
    pub description: Option<String>,
    pub lines: Vec<JournalLineRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReverseJournalEntryRequest {
    /// Defaults to today.
    pub reversal_date: Option<NaiveDate>,
    pub reason: Option<String>,
}

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeListQuery {
    pub status: Option<EmployeeStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<InvoiceStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecurringListQuery {
    pub status: Option<RecurringStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<String>,
}

// -------------------------
// Mapping helpers
// -------------------------

/// `201 Created` with the id of whatever was created.
pub fn created(id: impl ToString, committed: &[StoredEvent]) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({ "id": id.to_string(), "events_committed": committed.len() })),
    )
        .into_response()
}

/// `200 OK` for an accepted action on an existing aggregate.
pub fn accepted(id: impl ToString, committed: &[StoredEvent]) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "id": id.to_string(), "events_committed": committed.len() })),
    )
        .into_response()
}

/// Resolve a requested line against the chart; codes outside the chart
/// need an explicit name and kind.
pub fn journal_line(chart: &ChartOfAccounts, line: &JournalLineRequest) -> Result<JournalEntryLine, Response> {
    let account = match chart.find(&line.account_code) {
        Some(account) => account.clone(),
        None => {
            let (Some(name), Some(kind)) = (line.account_name.as_ref(), line.kind.as_deref()) else {
                return Err(errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "unknown_account",
                    format!(
                        "account {} is not in the chart; provide account_name and kind",
                        line.account_code
                    ),
                ));
            };
            Account {
                code: line.account_code.clone(),
                name: name.clone(),
                kind: errors::parse_account_kind(kind)?,
            }
        }
    };
    Ok(match line.side {
        Side::Debit => JournalEntryLine::debit(&account, line.amount),
        Side::Credit => JournalEntryLine::credit(&account, line.amount),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(code: &str, name: Option<&str>, kind: Option<&str>) -> JournalLineRequest {
        JournalLineRequest {
            account_code: code.to_string(),
            account_name: name.map(str::to_string),
            kind: kind.map(str::to_string),
            amount: 500,
            side: Side::Credit,
        }
    }

    #[test]
    fn chart_accounts_resolve_by_code() {
        let chart = ChartOfAccounts::standard();
        let resolved = journal_line(&chart, &line(&chart.cash.code, None, None)).unwrap();
        assert_eq!(resolved.account, chart.cash);
        assert!(!resolved.is_debit);
    }

    #[test]
    fn foreign_accounts_need_name_and_kind() {
        let chart = ChartOfAccounts::standard();
        assert!(journal_line(&chart, &line("9999", None, None)).is_err());
        assert!(journal_line(&chart, &line("9999", Some("Suspense"), Some("bogus"))).is_err());
        let ok = journal_line(&chart, &line("9999", Some("Suspense"), Some("Liability"))).unwrap();
        assert_eq!(ok.account.name, "Suspense");
    }
}
