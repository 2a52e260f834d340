//! Text formatting for segment times and trajectory metrics.

/// Guards against `x * 10.0` landing a hair below an exact decisecond.
const DECISECOND_EPSILON: f64 = 1e-9;

/// Format a position in seconds as `m:ss.d`.
///
/// Seconds are truncated to one decisecond, never rounded, so `59.96`
/// renders as `0:59.9`. Negative and non-finite inputs render as `0:00.0`.
pub fn format_time(seconds: f64) -> String {
    let deciseconds = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 10.0 + DECISECOND_EPSILON).floor() as u64
    } else {
        0
    };

    let minutes = deciseconds / 600;
    let rem = deciseconds % 600;
    format!("{minutes}:{:02}.{}", rem / 10, rem % 10)
}

/// Format the span between two positions with one decimal, e.g. `"12.5s"`.
pub fn format_duration(start: f64, end: f64) -> String {
    format!("{}s", format_one_decimal(end - start))
}

/// Format a metric with one decimal place.
pub fn format_one_decimal(value: f64) -> String {
    format!("{value:.1}")
}
