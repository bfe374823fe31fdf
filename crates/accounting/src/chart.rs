//! Chart of accounts used by automatic postings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use keel_core::{DomainError, DomainResult};

use crate::ledger::{Account, AccountKind};

/// Account codes, overridable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountCodes {
    pub cash: String,
    pub receivables: String,
    pub salaries_payable: String,
    pub income_tax_payable: String,
    pub social_insurance_payable: String,
    pub revenue: String,
    pub salary_expense: String,
}

impl Default for AccountCodes {
    fn default() -> Self {
        Self {
            cash: "1000".into(),
            receivables: "1100".into(),
            salaries_payable: "2100".into(),
            income_tax_payable: "2200".into(),
            social_insurance_payable: "2300".into(),
            revenue: "4000".into(),
            salary_expense: "6000".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOfAccounts {
    pub cash: Account,
    pub receivables: Account,
    pub salaries_payable: Account,
    pub income_tax_payable: Account,
    pub social_insurance_payable: Account,
    pub revenue: Account,
    pub salary_expense: Account,
}

fn account(code: &str, name: &str, kind: AccountKind) -> DomainResult<Account> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation(format!("account code for {name} cannot be empty")));
    }
    Ok(Account {
        code: code.to_string(),
        name: name.to_string(),
        kind,
    })
}

impl ChartOfAccounts {
    pub fn standard() -> Self {
        let codes = AccountCodes::default();
        let fixed = |code: String, name: &str, kind| Account {
            code,
            name: name.to_string(),
            kind,
        };
        Self {
            cash: fixed(codes.cash, "Cash", AccountKind::Asset),
            receivables: fixed(codes.receivables, "Accounts Receivable", AccountKind::Asset),
            salaries_payable: fixed(codes.salaries_payable, "Salaries Payable", AccountKind::Liability),
            income_tax_payable: fixed(
                codes.income_tax_payable,
                "Income Tax Payable",
                AccountKind::Liability,
            ),
            social_insurance_payable: fixed(
                codes.social_insurance_payable,
                "Social Insurance Payable",
                AccountKind::Liability,
            ),
            revenue: fixed(codes.revenue, "Revenue", AccountKind::Revenue),
            salary_expense: fixed(codes.salary_expense, "Salary Expense", AccountKind::Expense),
        }
    }

    pub fn from_codes(codes: &AccountCodes) -> DomainResult<Self> {
        let chart = Self {
            cash: account(&codes.cash, "Cash", AccountKind::Asset)?,
            receivables: account(&codes.receivables, "Accounts Receivable", AccountKind::Asset)?,
            salaries_payable: account(
                &codes.salaries_payable,
                "Salaries Payable",
                AccountKind::Liability,
            )?,
            income_tax_payable: account(
                &codes.income_tax_payable,
                "Income Tax Payable",
                AccountKind::Liability,
            )?,
            social_insurance_payable: account(
                &codes.social_insurance_payable,
                "Social Insurance Payable",
                AccountKind::Liability,
            )?,
            revenue: account(&codes.revenue, "Revenue", AccountKind::Revenue)?,
            salary_expense: account(&codes.salary_expense, "Salary Expense", AccountKind::Expense)?,
        };

        let mut seen = HashSet::new();
        for acc in chart.accounts() {
            if !seen.insert(acc.code.as_str()) {
                return Err(DomainError::validation(format!(
                    "account code {} is assigned twice",
                    acc.code
                )));
            }
        }
        Ok(chart)
    }

    pub fn accounts(&self) -> [&Account; 7] {
        [
            &self.cash,
            &self.receivables,
            &self.salaries_payable,
            &self.income_tax_payable,
            &self.social_insurance_payable,
            &self.revenue,
            &self.salary_expense,
        ]
    }

    pub fn find(&self, code: &str) -> Option<&Account> {
        self.accounts().into_iter().find(|a| a.code == code)
    }
}

impl Default for ChartOfAccounts {
    fn default() -> Self {
        Self::standard()
    }
}
