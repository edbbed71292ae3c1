//! Human-friendly duration strings.
//!
//! Accepts a plain integer (milliseconds) or an integer with one of the
//! suffixes `ms`, `s`, `m`, `h`. Whitespace around the value is ignored.

use std::time::Duration;

/// Parse `"500ms"`, `"10s"`, `"2m"`, `"1h"` or `"1500"` (milliseconds).
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let millis = match unit.trim() {
        "" | "ms" => value,
        "s" => value.checked_mul(1000)?,
        "m" => value.checked_mul(60_000)?,
        "h" => value.checked_mul(3_600_000)?,
        _ => return None,
    };
    Some(Duration::from_millis(millis))
}
