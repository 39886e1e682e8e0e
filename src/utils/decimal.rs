//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Spread between two prices in basis points, relative to the lower one.
///
/// Symmetric in its arguments.
pub fn spread_bps(a: Decimal, b: Decimal) -> Decimal {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    to_basis_points(safe_div(high - low, low))
}

/// Calculate basis points (1 bp = 0.01%)
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Difference between two percentages, in basis points.
pub fn percent_points_to_bps(diff_pct: Decimal) -> Decimal {
    diff_pct * dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Format a dollar amount with two decimals.
pub fn usd(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}
