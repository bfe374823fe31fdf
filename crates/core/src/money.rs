//! Integer money arithmetic in minor units (cents).
//!
//! All rounding is half-up on the cent.

use crate::error::{DomainError, DomainResult};

/// Basis points in 100%.
pub const FULL_RATE_BP: u32 = 10_000;

/// `amount * part / whole`, rounded half up.
pub fn prorate(amount: u64, part: u32, whole: u32) -> DomainResult<u64> {
    if whole == 0 {
        return Err(DomainError::validation("proration base must be positive"));
    }
    if part > whole {
        return Err(DomainError::validation(format!(
            "proration part {part} exceeds base {whole}"
        )));
    }
    let scaled = u128::from(amount) * u128::from(part) * 2 + u128::from(whole);
    let rounded = scaled / (u128::from(whole) * 2);
    u64::try_from(rounded).map_err(|_| DomainError::invariant("prorated amount overflow"))
}

/// `amount * rate_bp / 10_000`, rounded half up.
pub fn apply_rate_bp(amount: u64, rate_bp: u32) -> DomainResult<u64> {
    let scaled = u128::from(amount) * u128::from(rate_bp) + u128::from(FULL_RATE_BP / 2);
    let rounded = scaled / u128::from(FULL_RATE_BP);
    u64::try_from(rounded).map_err(|_| DomainError::invariant("rate application overflow"))
}

/// Overflow-checked sum.
pub fn checked_sum<I>(amounts: I) -> DomainResult<u64>
where
    I: IntoIterator<Item = u64>,
{
    amounts.into_iter().try_fold(0u64, |acc, a| {
        acc.checked_add(a)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    })
}
