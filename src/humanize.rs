//! Short human-readable durations for the status page (`350ms`, `12s`, `4m`).

use std::borrow::Borrow;
use std::time::Duration;

const SECOND: u128 = 1_000;
const MINUTE: u128 = 60 * SECOND;
const HOUR: u128 = 60 * MINUTE;
const DAY: u128 = 24 * HOUR;

/// Render `d` in the largest whole unit it reaches, rounded to nearest.
pub fn duration<D: Borrow<Duration>>(d: D) -> String {
    let ms = d.borrow().as_millis();
    for (unit, suffix) in [(DAY, "d"), (HOUR, "h"), (MINUTE, "m"), (SECOND, "s")] {
        if ms >= unit {
            let rounded = (ms as f64 / unit as f64).round() as u64;
            return format!("{rounded}{suffix}");
        }
    }
    format!("{ms}ms")
}

/// Same as [`duration`] for a signed chrono delta; negative spans clamp to zero.
pub fn delta(d: chrono::TimeDelta) -> String {
    duration(d.to_std().unwrap_or_default())
}
