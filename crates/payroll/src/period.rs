use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use keel_core::calendar::days_in_month;
use keel_core::DomainError;

/// A monthly pay period, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayPeriod {
    year: i32,
    month: u32,
}

impl PayPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!("invalid month {month}")));
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(DomainError::validation(format!("unsupported year {year}")));
        }
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn end(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, self.days()).unwrap_or(NaiveDate::MAX)
    }

    pub fn days(&self) -> u32 {
        days_in_month(self.year, self.month)
    }
}

impl core::fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PayPeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("pay period must be YYYY-MM, got '{s}'"));
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(invalid());
        }
        let year = y.parse::<i32>().map_err(|_| invalid())?;
        let month = m.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for PayPeriod {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PayPeriod> for String {
    fn from(value: PayPeriod) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_year_month() {
        let p: PayPeriod = "2024-02".parse().unwrap();
        assert_eq!(p.to_string(), "2024-02");
        assert_eq!(p.days(), 29);
        assert_eq!(p.start(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(p.end(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn rejects_malformed_periods() {
        for bad in ["2024-13", "2024-2", "24-02", "2024/02", "", "2024-00"] {
            assert!(bad.parse::<PayPeriod>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn serializes_as_a_string() {
        let p = PayPeriod::new(2025, 11).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"2025-11\"");
        let back: PayPeriod = serde_json::from_str("\"2025-11\"").unwrap();
        assert_eq!(back, p);
    }
}
