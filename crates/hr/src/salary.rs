//! The fixed salary component set.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use keel_core::{DomainError, DomainResult};

/// Monthly salary package, all amounts in cents.
///
/// The component set is closed: payroll knows exactly these four earnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalaryPackage {
    pub basic: u64,
    #[serde(default)]
    pub housing: u64,
    #[serde(default)]
    pub transport: u64,
    #[serde(default)]
    pub other: u64,
}

impl SalaryPackage {
    pub fn validate(&self) -> DomainResult<()> {
        if self.basic == 0 {
            return Err(DomainError::validation("basic salary must be positive"));
        }
        self.monthly_gross().map(|_| ())
    }

    pub fn monthly_gross(&self) -> DomainResult<u64> {
        keel_core::money::checked_sum([self.basic, self.housing, self.transport, self.other])
    }
}

/// A package and the first day it applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRevision {
    pub effective_date: NaiveDate,
    pub package: SalaryPackage,
}

/// Package in effect on `date`, given revisions sorted by effective date.
pub fn package_effective_on(history: &[SalaryRevision], date: NaiveDate) -> Option<SalaryPackage> {
    history
        .iter()
        .rev()
        .find(|r| r.effective_date <= date)
        .map(|r| r.package)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn pkg(basic: u64) -> SalaryPackage {
        SalaryPackage {
            basic,
            ..Default::default()
        }
    }

    #[test]
    fn latest_revision_on_or_before_the_date_wins() {
        let history = vec![
            SalaryRevision { effective_date: d(2024, 1, 1), package: pkg(100) },
            SalaryRevision { effective_date: d(2024, 3, 15), package: pkg(200) },
        ];
        assert_eq!(package_effective_on(&history, d(2023, 12, 31)), None);
        assert_eq!(package_effective_on(&history, d(2024, 3, 14)), Some(pkg(100)));
        assert_eq!(package_effective_on(&history, d(2024, 3, 15)), Some(pkg(200)));
    }

    #[test]
    fn zero_basic_is_rejected() {
        assert!(pkg(0).validate().is_err());
        let overflow = SalaryPackage { basic: u64::MAX, housing: 1, transport: 0, other: 0 };
        assert!(overflow.validate().is_err());
    }
}
