use serde::{Deserialize, Serialize};

use keel_core::money::FULL_RATE_BP;
use keel_core::{DomainError, DomainResult};

/// Tenant-wide deduction rules, rates in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayrollPolicy {
    /// Applied to gross earnings minus social insurance.
    pub income_tax_rate_bp: u32,
    /// Applied to earned basic + housing, capped by `social_insurance_ceiling`.
    pub social_insurance_rate_bp: u32,
    /// Maximum monthly insurable earnings, in cents.
    pub social_insurance_ceiling: Option<u64>,
}

impl Default for PayrollPolicy {
    fn default() -> Self {
        Self {
            income_tax_rate_bp: 1_000,
            social_insurance_rate_bp: 700,
            social_insurance_ceiling: None,
        }
    }
}

impl PayrollPolicy {
    pub fn validate(&self) -> DomainResult<()> {
        if self.income_tax_rate_bp > FULL_RATE_BP {
            return Err(DomainError::validation("income tax rate exceeds 100%"));
        }
        if self.social_insurance_rate_bp > FULL_RATE_BP {
            return Err(DomainError::validation("social insurance rate exceeds 100%"));
        }
        Ok(())
    }
}
