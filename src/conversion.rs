//! Time unit conversion between the microsecond timestamps used by the public
//! API and the floating-point seconds used by frame sources.

/// Microseconds per second.
pub const MICROSECONDS_PER_SECOND: f64 = 1_000_000.0;

/// Convert a microsecond timestamp to seconds.
///
/// ```
/// use seekframe::conversion::microseconds_to_seconds;
///
/// assert_eq!(microseconds_to_seconds(1_500_000), 1.5);
/// assert_eq!(microseconds_to_seconds(-250_000), -0.25);
/// ```
#[inline]
pub fn microseconds_to_seconds(microseconds: i64) -> f64 {
    microseconds as f64 / MICROSECONDS_PER_SECOND
}

/// Convert seconds to a microsecond timestamp, rounding to the nearest
/// microsecond.
///
/// Non-finite input maps to zero.
///
/// ```
/// use seekframe::conversion::seconds_to_microseconds;
///
/// assert_eq!(seconds_to_microseconds(0.5), 500_000);
/// assert_eq!(seconds_to_microseconds(f64::NAN), 0);
/// ```
#[inline]
pub fn seconds_to_microseconds(seconds: f64) -> i64 {
    if !seconds.is_finite() {
        return 0;
    }
    (seconds * MICROSECONDS_PER_SECOND).round() as i64
}
