//! Canonical units and integer helpers used by settlement.
//!
//! All reward math is integer-only. Intermediate products are widened to
//! `u128` and results are truncated toward zero.

/// Ledger height (block number).
pub type Height = u64;

/// Abstract compute units served by a provider.
pub type ComputeUnits = u64;

/// Token amount in the smallest denomination.
pub type Amount = u64;

/// Downstream chain identifier (e.g. `ETH1`).
pub type ChainId = String;

/// Denominator for basis-point ratios (10_000 bps == 100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Safe multiplication followed by division using a u128 intermediate.
/// Returns None if the divisor is zero or the quotient does not fit in u64.
#[inline]
pub fn mul_div_u64(n: u64, mul: u64, div: u64) -> Option<u64> {
    if div == 0 {
        return None;
    }
    let quotient = (n as u128) * (mul as u128) / (div as u128);
    u64::try_from(quotient).ok()
}

/// Apply a basis-point ratio to an amount (truncating).
#[inline]
pub fn apply_bps(amount: Amount, bps: u64) -> Option<Amount> {
    mul_div_u64(amount, bps, BPS_DENOMINATOR)
}
