//! Common time/period helpers for shot_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Compute the period in milliseconds for a given rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 millisecond.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Milliseconds to seconds as used by sample timestamps.
#[inline]
#[allow(clippy::cast_precision_loss)]
pub fn secs(ms: u64) -> f32 {
    ms as f32 / 1000.0
}

/// Seconds to whole milliseconds, saturating; negative and NaN map to 0.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn millis(s: f32) -> u64 {
    if s.is_nan() || s <= 0.0 {
        return 0;
    }
    (f64::from(s) * 1000.0).round().min(u64::MAX as f64) as u64
}

/// Goal weights are whole grams; all arithmetic on them is in f32.
#[inline]
#[allow(clippy::cast_precision_loss)]
pub fn grams(goal_g: u32) -> f32 {
    goal_g as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_clamps_zero_hz() {
        assert_eq!(period_ms(0), 1000);
        assert_eq!(period_ms(50), 20);
        assert_eq!(period_ms(5000), 1);
    }

    #[test]
    fn seconds_and_millis_convert() {
        assert!((secs(1500) - 1.5).abs() < f32::EPSILON);
        assert_eq!(millis(3.0), 3000);
        assert_eq!(millis(-1.0), 0);
        assert_eq!(millis(f32::NAN), 0);
    }
}
