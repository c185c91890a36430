//! Duration literals used by the process configuration.
//!
//! Accepts the Go-style form operators already use for these jobs: one or more
//! `<integer><unit>` groups with units `ms`, `s`, `m`, `h` (`500ms`, `30s`,
//! `1h30m`). A bare integer means seconds.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Parse a duration literal such as `5m` or `1h30m`.
pub fn parse_duration(input: &str) -> CoreResult<Duration> {
    let literal = input.trim();
    if literal.is_empty() {
        return Err(CoreError::validation("duration must not be empty"));
    }

    if let Ok(secs) = literal.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = literal;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid(input, "number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => scaled_secs(input, value, 60)?,
            "h" => scaled_secs(input, value, 3600)?,
            "" => return Err(invalid(input, "missing unit")),
            other => return Err(invalid(input, &format!("unknown unit '{other}'"))),
        };

        total = total
            .checked_add(part)
            .ok_or_else(|| invalid(input, "duration overflows"))?;
    }

    Ok(total)
}

fn scaled_secs(input: &str, value: u64, factor: u64) -> CoreResult<Duration> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(input, "duration overflows"))
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::validation(format!("invalid duration '{input}': {reason}"))
}
