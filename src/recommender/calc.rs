//! Scaling arithmetic
//!
//! Both calculators saturate instead of wrapping: member counts at the
//! `i32` boundary, CPU quantities at the `i64` boundary. Bounds are applied
//! after the scaling computation, upper bound first, so a minimum larger
//! than the maximum wins.

use crate::quantity::{Quantity, QuantityError};
use crate::util::{max_quantity, min_quantity};

/// New member count for a rack: `round(current × factor)`, saturated and
/// clamped to the optional inclusive bounds.
pub fn calculate_members(current: i32, min: Option<i32>, max: Option<i32>, factor: f64) -> i32 {
    let scaled = f64::from(current) * factor;
    let mut members = if scaled >= f64::from(i32::MAX) {
        i32::MAX
    } else {
        scaled.round() as i32
    };

    if let Some(max) = max {
        members = members.min(max);
    }
    if let Some(min) = min {
        members = members.max(min);
    }

    members
}

/// New CPU quantity: `current × factor` computed in milli-units while that
/// fits in an `i64`, in whole units when only those fit, saturated at
/// `i64::MAX` units otherwise; then clamped to the optional bounds.
pub fn calculate_cpu(
    current: &Quantity,
    min: Option<&Quantity>,
    max: Option<&Quantity>,
    factor: f64,
) -> Result<Quantity, QuantityError> {
    let value = current.value()?;
    let milli = current.milli_value()?;

    let mut cpu = if value <= i64::MAX / 1000 && milli as f64 * factor <= i64::MAX as f64 {
        Quantity::from_millis((milli as f64 * factor) as i64)
    } else if value as f64 * factor <= i64::MAX as f64 {
        Quantity::from_units((value as f64 * factor) as i64)
    } else {
        Quantity::from_units(i64::MAX)
    };

    if let Some(max) = max {
        cpu = min_quantity(cpu, max.clone())?;
    }
    if let Some(min) = min {
        cpu = max_quantity(cpu, min.clone())?;
    }

    Ok(cpu)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn members_scale_by_factor() {
        assert_eq!(calculate_members(3, Some(1), Some(100), 2.0), 6);
        assert_eq!(calculate_members(4, None, None, 0.5), 2);
    }

    #[test]
    fn members_round_to_nearest() {
        assert_eq!(calculate_members(3, None, None, 0.5), 2); // 1.5 rounds up
        assert_eq!(calculate_members(3, None, None, 1.1), 3); // 3.3 rounds down
    }

    #[test]
    fn members_clamp_to_bounds() {
        assert_eq!(calculate_members(5, None, Some(10), 100.0), 10);
        assert_eq!(calculate_members(5, Some(3), None, 0.1), 3);
    }

    #[test]
    fn members_saturate_at_i32_max() {
        assert_eq!(calculate_members(i32::MAX, None, None, 2.0), i32::MAX);
        assert_eq!(calculate_members(2, None, None, f64::from(i32::MAX)), i32::MAX);
    }

    #[test]
    fn members_min_wins_over_max() {
        assert_eq!(calculate_members(5, Some(20), Some(10), 1.0), 20);
    }

    #[test]
    fn cpu_scales_in_millis() {
        let cpu = calculate_cpu(&q("5"), None, None, 4.0).unwrap();
        assert_eq!(cpu.0, "20");
        let cpu = calculate_cpu(&q("500m"), None, None, 3.0).unwrap();
        assert_eq!(cpu.0, "1500m");
    }

    #[test]
    fn cpu_clamps_to_bounds() {
        let cpu = calculate_cpu(&q("2"), None, Some(&q("4")), 100.0).unwrap();
        assert_eq!(cpu, q("4"));
        let cpu = calculate_cpu(&q("2"), Some(&q("1")), None, 0.1).unwrap();
        assert_eq!(cpu, q("1"));
    }

    #[test]
    fn cpu_switches_to_units_when_millis_overflow() {
        // 2^61 units: milli-units would overflow i64, whole units still fit
        let big = (1i64 << 61).to_string();
        let cpu = calculate_cpu(&q(&big), None, None, 2.0).unwrap();
        assert_eq!(cpu.value().unwrap(), 1i64 << 62);
    }

    #[test]
    fn cpu_saturates_at_i64_max() {
        let max = i64::MAX.to_string();
        let cpu = calculate_cpu(&q(&max), None, None, 2.0).unwrap();
        assert_eq!(cpu.value().unwrap(), i64::MAX);
    }

    #[test]
    fn cpu_rejects_unparseable_bound() {
        assert!(calculate_cpu(&q("2"), None, Some(&q("nope")), 2.0).is_err());
    }

    proptest! {
        #[test]
        fn members_stay_within_bounds(
            current in 0..i32::MAX,
            factor in 0.0f64..1000.0,
            min in 0..1000i32,
            span in 0..1000i32,
        ) {
            let max = min + span;
            let members = calculate_members(current, Some(min), Some(max), factor);
            prop_assert!(members >= min);
            prop_assert!(members <= max);
        }

        #[test]
        fn members_match_reference(current in 0..i32::MAX, factor in 0.0f64..1000.0) {
            let scaled = f64::from(current) * factor;
            let expected = if scaled >= f64::from(i32::MAX) { i32::MAX } else { scaled.round() as i32 };
            prop_assert_eq!(calculate_members(current, None, None, factor), expected);
        }

        #[test]
        fn cpu_monotonic_in_factor(
            millis in 1i64..1_000_000_000,
            factor in 0.0f64..100.0,
            bump in 0.0f64..100.0,
        ) {
            let current = Quantity::from_millis(millis);
            let low = calculate_cpu(&current, None, None, factor).unwrap();
            let high = calculate_cpu(&current, None, None, factor + bump).unwrap();
            prop_assert!(low.cmp_value(&high).unwrap().is_le());
        }

        #[test]
        fn cpu_exact_when_no_overflow(millis in 1i64..1_000_000, factor_x10 in 0u32..1000) {
            let factor = f64::from(factor_x10) / 10.0;
            let current = Quantity::from_millis(millis);
            let cpu = calculate_cpu(&current, None, None, factor).unwrap();
            prop_assert_eq!(cpu.milli_value().unwrap(), (millis as f64 * factor) as i64);
        }
    }
}
