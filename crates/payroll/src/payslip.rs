//! Payslip calculation.
//!
//! 1. Employment window ∩ pay period; no overlap means no payslip.
//! 2. The package in effect on the last employed day of the period applies
//!    to the whole window.
//! 3. Each earning component is prorated by `days_worked / days_in_period`.
//! 4. Social insurance is charged on earned basic + housing, up to the ceiling.
//! 5. Income tax is charged on gross minus social insurance.
//!
//! Lines with a zero amount are left off the payslip.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use keel_core::calendar::{days_inclusive, overlap};
use keel_core::money::{apply_rate_bp, checked_sum, prorate};
use keel_core::{DomainError, DomainResult};
use keel_hr::{Employee, EmployeeId, SalaryRevision, package_effective_on};

use crate::period::PayPeriod;
use crate::policy::PayrollPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryComponent {
    Basic,
    Housing,
    Transport,
    Other,
    SocialInsurance,
    IncomeTax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Earning,
    Deduction,
}

impl SalaryComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            SalaryComponent::Basic
            | SalaryComponent::Housing
            | SalaryComponent::Transport
            | SalaryComponent::Other => ComponentKind::Earning,
            SalaryComponent::SocialInsurance | SalaryComponent::IncomeTax => {
                ComponentKind::Deduction
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayslipLine {
    pub component: SalaryComponent,
    pub amount: u64,
}

/// What payroll needs to know about an employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollEmployee {
    pub employee_id: EmployeeId,
    pub employee_number: String,
    pub full_name: String,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
    /// Sorted by effective date; the first revision starts on the hire date.
    pub salary_history: Vec<SalaryRevision>,
}

impl PayrollEmployee {
    /// Snapshot of a hired employee; `None` before the hire event.
    pub fn from_employee(employee: &Employee) -> Option<Self> {
        Some(Self {
            employee_id: employee.id_typed(),
            employee_number: employee.employee_number().to_string(),
            full_name: employee.full_name().to_string(),
            hire_date: employee.hire_date()?,
            termination_date: employee.termination_date(),
            salary_history: employee.salary_history().to_vec(),
        })
    }

    fn window_in(&self, period: PayPeriod) -> Option<(NaiveDate, NaiveDate)> {
        let left = self.termination_date.unwrap_or(NaiveDate::MAX);
        overlap((self.hire_date, left), (period.start(), period.end()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payslip {
    pub employee_id: EmployeeId,
    pub employee_number: String,
    pub full_name: String,
    pub period: PayPeriod,
    pub days_worked: u32,
    pub days_in_period: u32,
    pub earnings: Vec<PayslipLine>,
    pub deductions: Vec<PayslipLine>,
    pub gross: u64,
    pub total_deductions: u64,
    pub net: u64,
}

impl Payslip {
    pub fn amount_of(&self, component: SalaryComponent) -> u64 {
        self.earnings
            .iter()
            .chain(self.deductions.iter())
            .filter(|l| l.component == component)
            .map(|l| l.amount)
            .sum()
    }
}

/// Compute the payslip of `employee` for `period`.
///
/// Returns `Ok(None)` when the employee was not on the payroll on any day of
/// the period.
pub fn calculate_payslip(
    employee: &PayrollEmployee,
    period: PayPeriod,
    policy: &PayrollPolicy,
) -> DomainResult<Option<Payslip>> {
    let Some((from, to)) = employee.window_in(period) else {
        return Ok(None);
    };

    let package = package_effective_on(&employee.salary_history, to).ok_or_else(|| {
        DomainError::invariant(format!(
            "employee {} has no salary in effect on {to}",
            employee.employee_number
        ))
    })?;

    let days_in_period = period.days();
    let days_worked = days_inclusive(from, to);

    let basic = prorate(package.basic, days_worked, days_in_period)?;
    let housing = prorate(package.housing, days_worked, days_in_period)?;
    let transport = prorate(package.transport, days_worked, days_in_period)?;
    let other = prorate(package.other, days_worked, days_in_period)?;
    let gross = checked_sum([basic, housing, transport, other])?;

    let insurable = checked_sum([basic, housing])?;
    let insurable = match policy.social_insurance_ceiling {
        Some(ceiling) => insurable.min(ceiling),
        None => insurable,
    };
    let social_insurance = apply_rate_bp(insurable, policy.social_insurance_rate_bp)?;

    let taxable = gross.saturating_sub(social_insurance);
    let income_tax = apply_rate_bp(taxable, policy.income_tax_rate_bp)?;

    let total_deductions = checked_sum([social_insurance, income_tax])?;
    let net = gross
        .checked_sub(total_deductions)
        .ok_or_else(|| DomainError::invariant("deductions exceed gross pay"))?;

    let earnings = non_zero_lines([
        (SalaryComponent::Basic, basic),
        (SalaryComponent::Housing, housing),
        (SalaryComponent::Transport, transport),
        (SalaryComponent::Other, other),
    ]);
    let deductions = non_zero_lines([
        (SalaryComponent::SocialInsurance, social_insurance),
        (SalaryComponent::IncomeTax, income_tax),
    ]);

    Ok(Some(Payslip {
        employee_id: employee.employee_id,
        employee_number: employee.employee_number.clone(),
        full_name: employee.full_name.clone(),
        period,
        days_worked,
        days_in_period,
        earnings,
        deductions,
        gross,
        total_deductions,
        net,
    }))
}

fn non_zero_lines<const N: usize>(lines: [(SalaryComponent, u64); N]) -> Vec<PayslipLine> {
    lines
        .into_iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(component, amount)| PayslipLine { component, amount })
        .collect()
}

/// Run-level sums over all payslips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayrollTotals {
    pub employee_count: u32,
    pub gross: u64,
    pub social_insurance: u64,
    pub income_tax: u64,
    pub net: u64,
}

impl PayrollTotals {
    pub fn from_payslips(payslips: &[Payslip]) -> DomainResult<Self> {
        let employee_count = u32::try_from(payslips.len())
            .map_err(|_| DomainError::invariant("too many payslips"))?;
        Ok(Self {
            employee_count,
            gross: checked_sum(payslips.iter().map(|p| p.gross))?,
            social_insurance: checked_sum(
                payslips
                    .iter()
                    .map(|p| p.amount_of(SalaryComponent::SocialInsurance)),
            )?,
            income_tax: checked_sum(
                payslips.iter().map(|p| p.amount_of(SalaryComponent::IncomeTax)),
            )?,
            net: checked_sum(payslips.iter().map(|p| p.net))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::AggregateId;
    use keel_hr::SalaryPackage;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn employee(hire: NaiveDate, termination: Option<NaiveDate>, package: SalaryPackage) -> PayrollEmployee {
        PayrollEmployee {
            employee_id: EmployeeId::new(AggregateId::new()),
            employee_number: "E-1".into(),
            full_name: "Ada Byron".into(),
            hire_date: hire,
            termination_date: termination,
            salary_history: vec![SalaryRevision {
                effective_date: hire,
                package,
            }],
        }
    }

    fn package() -> SalaryPackage {
        SalaryPackage {
            basic: 400_000,
            housing: 100_000,
            transport: 31_000,
            other: 0,
        }
    }

    fn no_ceiling() -> PayrollPolicy {
        PayrollPolicy {
            income_tax_rate_bp: 1_000,
            social_insurance_rate_bp: 700,
            social_insurance_ceiling: None,
        }
    }

    #[test]
    fn full_month_pays_the_whole_package() {
        let e = employee(d(2023, 6, 1), None, package());
        let slip = calculate_payslip(&e, PayPeriod::new(2024, 3).unwrap(), &no_ceiling())
            .unwrap()
            .unwrap();

        assert_eq!(slip.days_worked, 31);
        assert_eq!(slip.gross, 531_000);
        // 7% of 500_000
        assert_eq!(slip.amount_of(SalaryComponent::SocialInsurance), 35_000);
        // 10% of 496_000
        assert_eq!(slip.amount_of(SalaryComponent::IncomeTax), 49_600);
        assert_eq!(slip.net, 531_000 - 35_000 - 49_600);
        // "other" is zero and therefore omitted
        assert_eq!(slip.earnings.len(), 3);
    }

    #[test]
    fn mid_month_hire_is_prorated_by_calendar_days() {
        // Hired on the 16th of a 30-day month: 15 days worked.
        let e = employee(d(2024, 4, 16), None, package());
        let slip = calculate_payslip(&e, PayPeriod::new(2024, 4).unwrap(), &no_ceiling())
            .unwrap()
            .unwrap();

        assert_eq!(slip.days_worked, 15);
        assert_eq!(slip.days_in_period, 30);
        assert_eq!(slip.amount_of(SalaryComponent::Basic), 200_000);
        assert_eq!(slip.amount_of(SalaryComponent::Housing), 50_000);
        assert_eq!(slip.amount_of(SalaryComponent::Transport), 15_500);
    }

    #[test]
    fn termination_inside_the_period_cuts_the_window() {
        let e = employee(d(2020, 1, 1), Some(d(2024, 2, 10)), package());
        let slip = calculate_payslip(&e, PayPeriod::new(2024, 2).unwrap(), &no_ceiling())
            .unwrap()
            .unwrap();
        assert_eq!(slip.days_worked, 10);
        assert_eq!(slip.days_in_period, 29);
        // 400_000 * 10 / 29 = 137_931.03
        assert_eq!(slip.amount_of(SalaryComponent::Basic), 137_931);
    }

    #[test]
    fn employees_outside_the_period_get_no_payslip() {
        let before = employee(d(2020, 1, 1), Some(d(2024, 1, 31)), package());
        let after = employee(d(2024, 3, 1), None, package());
        let feb = PayPeriod::new(2024, 2).unwrap();
        assert_eq!(calculate_payslip(&before, feb, &no_ceiling()).unwrap(), None);
        assert_eq!(calculate_payslip(&after, feb, &no_ceiling()).unwrap(), None);
    }

    #[test]
    fn package_at_period_end_applies_to_the_whole_window() {
        let mut e = employee(d(2023, 1, 1), None, package());
        e.salary_history.push(SalaryRevision {
            effective_date: d(2024, 5, 20),
            package: SalaryPackage {
                basic: 500_000,
                ..package()
            },
        });
        let slip = calculate_payslip(&e, PayPeriod::new(2024, 5).unwrap(), &no_ceiling())
            .unwrap()
            .unwrap();
        assert_eq!(slip.amount_of(SalaryComponent::Basic), 500_000);
    }

    #[test]
    fn social_insurance_respects_the_ceiling() {
        let e = employee(d(2023, 1, 1), None, package());
        let policy = PayrollPolicy {
            social_insurance_ceiling: Some(300_000),
            ..no_ceiling()
        };
        let slip = calculate_payslip(&e, PayPeriod::new(2024, 1).unwrap(), &policy)
            .unwrap()
            .unwrap();
        assert_eq!(slip.amount_of(SalaryComponent::SocialInsurance), 21_000);
    }

    #[test]
    fn totals_sum_every_payslip() {
        let period = PayPeriod::new(2024, 1).unwrap();
        let a = calculate_payslip(&employee(d(2023, 1, 1), None, package()), period, &no_ceiling())
            .unwrap()
            .unwrap();
        let b = calculate_payslip(&employee(d(2024, 1, 17), None, package()), period, &no_ceiling())
            .unwrap()
            .unwrap();

        let totals = PayrollTotals::from_payslips(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(totals.employee_count, 2);
        assert_eq!(totals.gross, a.gross + b.gross);
        assert_eq!(totals.net, a.net + b.net);
        assert_eq!(
            totals.gross,
            totals.net + totals.social_insurance + totals.income_tax
        );
    }

    proptest! {
        #[test]
        fn net_plus_deductions_always_equals_gross(
            basic in 1u64..5_000_000,
            housing in 0u64..2_000_000,
            transport in 0u64..500_000,
            other in 0u64..500_000,
            hire_day in 1u32..=28,
            tax in 0u32..=10_000,
            si in 0u32..=10_000,
        ) {
            let pkg = SalaryPackage { basic, housing, transport, other };
            let e = employee(d(2024, 2, hire_day), None, pkg);
            let policy = PayrollPolicy {
                income_tax_rate_bp: tax,
                social_insurance_rate_bp: si,
                social_insurance_ceiling: None,
            };
            let slip = calculate_payslip(&e, PayPeriod::new(2024, 2).unwrap(), &policy)
                .unwrap()
                .unwrap();

            prop_assert_eq!(slip.net + slip.total_deductions, slip.gross);
            prop_assert!(slip.gross <= pkg.monthly_gross().unwrap());
            prop_assert!(slip.days_worked <= slip.days_in_period);
        }
    }
}
