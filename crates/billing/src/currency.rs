//! Integer-cent currency math
//!
//! All monetary amounts in the system are integer minor units (cents).
//! Conversion between currencies goes through an f64 ratio but rounds
//! back to whole cents immediately, half away from zero.

/// Convert an amount of cents by a ratio, rounding half away from zero.
pub fn convert_cents(cents: i64, ratio: f64) -> i64 {
    (cents as f64 * ratio).round() as i64
}

/// Ratio that maps `base_cents` onto `target_cents`. A zero base would
/// divide by zero, so it maps to the identity ratio.
pub fn conversion_ratio(base_cents: i64, target_cents: i64) -> f64 {
    if base_cents == 0 {
        return 1.0;
    }
    target_cents as f64 / base_cents as f64
}
