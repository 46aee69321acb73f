// Duration strings in the "1h30m" / "500ms" / "30s" form used by config files

use crate::error::{Result, VigilError};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parse a duration string made of `<number><unit>` segments.
///
/// Supported units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`.
/// Segments may be chained (`1h30m`) and numbers may carry a fractional part
/// (`1.5h`). An empty string parses to zero, which callers treat as "unset",
/// so a nonzero value below one nanosecond is rejected rather than rounded away.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || VigilError::ConfigValidationError(format!("Invalid duration: '{}'", input));

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_end].parse().map_err(|_| invalid())?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_end..];

        total_nanos += value * nanos;
    }

    let rounded = total_nanos.round();
    if total_nanos > 0.0 && rounded == 0.0 {
        return Err(VigilError::ConfigValidationError(format!(
            "Duration '{}' is shorter than one nanosecond",
            input
        )));
    }
    Ok(Duration::from_nanos(rounded as u64))
}

/// Render a duration in the same form `parse_duration` accepts
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos % 1_000_000 != 0 {
        return format!("{}ns", nanos);
    }
    let millis = duration.as_millis();
    if millis % 1_000 != 0 {
        return format!("{}ms", millis);
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    let hours = secs / 3_600;
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
        secs %= 3_600;
    }
    let minutes = secs / 60;
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
        secs %= 60;
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    out
}

/// Serde adapter for `Duration` fields written as strings
pub mod serde_str {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
