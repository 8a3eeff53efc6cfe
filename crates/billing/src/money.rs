//! Invoice total computation
//!
//! Pure integer arithmetic. Quantities are carried as integer hundredths
//! (2.50 units -> 250) and tax rates as basis points (8.25% -> 825) so no
//! floating point ever touches a money field. All rounding is
//! round-half-away-from-zero on the cents boundary.
//!
//! The calculator does not clamp: callers validate quantity >= 0.01,
//! unit_price >= 0 and discount >= 0 before calling in.

use serde::Serialize;

/// Computed totals for an invoice, all in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

/// Round n/d to the nearest integer, halves away from zero.
///
/// Inputs are non-negative by the callers' validation contract; d > 0.
fn div_round_half_away(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    (2 * n + d) / (2 * d)
}

/// Total for one line item: round(quantity * unit_price) in cents.
///
/// `quantity_hundredths` is the quantity scaled by 100.
pub fn line_total(quantity_hundredths: i64, unit_price_cents: i64) -> i64 {
    div_round_half_away(quantity_hundredths * unit_price_cents, 100)
}

/// Combine already-rounded line totals with a discount and an optional tax
/// rate into invoice totals.
///
/// Tax applies to the post-discount base: round((subtotal - discount) * rate).
pub fn compute_totals(
    line_totals: &[i64],
    discount_cents: i64,
    tax_rate_bps: Option<i64>,
) -> InvoiceTotals {
    let subtotal_cents: i64 = line_totals.iter().sum();

    let tax_cents = match tax_rate_bps {
        Some(rate) => div_round_half_away((subtotal_cents - discount_cents) * rate, 10_000),
        None => 0,
    };

    InvoiceTotals {
        subtotal_cents,
        discount_cents,
        tax_cents,
        total_cents: subtotal_cents - discount_cents + tax_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total_exact() {
        // 2 x $10.00 = $20.00
        assert_eq!(line_total(200, 1000), 2000);
        // 1 x $5.00
        assert_eq!(line_total(100, 500), 500);
    }

    #[test]
    fn test_line_total_fractional_quantity_rounds_half_up() {
        // 1.5 x $0.33 = 49.5c -> 50c
        assert_eq!(line_total(150, 33), 50);
        // 0.01 x $1.00 = 1c
        assert_eq!(line_total(1, 100), 1);
        // 2.33 x $0.07 = 16.31c -> 16c
        assert_eq!(line_total(233, 7), 16);
    }

    #[test]
    fn test_no_tax_no_discount() {
        // [{qty:2, price:1000}, {qty:1, price:500}] -> subtotal 2500, total 2500
        let lines = vec![line_total(200, 1000), line_total(100, 500)];
        let totals = compute_totals(&lines, 0, None);
        assert_eq!(totals.subtotal_cents, 2500);
        assert_eq!(totals.tax_cents, 0);
        assert_eq!(totals.total_cents, 2500);
    }

    #[test]
    fn test_discount_and_tax() {
        // subtotal 10000, discount 1000, tax 8.25% -> base 9000, tax 743, total 9743
        let totals = compute_totals(&[10_000], 1000, Some(825));
        assert_eq!(totals.tax_cents, 743);
        assert_eq!(totals.total_cents, 9743);
    }

    #[test]
    fn test_tax_rounds_half_away_from_zero() {
        // 1000 * 2.5% = 25.0 exactly
        assert_eq!(compute_totals(&[1000], 0, Some(250)).tax_cents, 25);
        // 1010 * 2.5% = 25.25 -> 25
        assert_eq!(compute_totals(&[1010], 0, Some(250)).tax_cents, 25);
        // 1020 * 2.5% = 25.5 -> 26
        assert_eq!(compute_totals(&[1020], 0, Some(250)).tax_cents, 26);
    }

    #[test]
    fn test_subtotal_is_sum_of_rounded_lines() {
        // Each line rounds independently before summing; the subtotal is NOT
        // a rounding of the raw sum.
        let lines = vec![line_total(150, 33), line_total(150, 33)];
        let totals = compute_totals(&lines, 0, None);
        assert_eq!(totals.subtotal_cents, 100); // 50 + 50, not round(99.0)
    }

    #[test]
    fn test_full_discount_with_tax_is_zero_total() {
        let totals = compute_totals(&[5000], 5000, Some(825));
        assert_eq!(totals.tax_cents, 0);
        assert_eq!(totals.total_cents, 0);
    }
}
