//! Start/stop time parsing and validation
//!
//! Times are entered as `now` or `+<n><unit>` (`m`, `h`, `d`) and resolved
//! against the submit instant, so start and stop of one request always share
//! the same base no matter when each is parsed.

use super::ValidationError;
use chrono::{DateTime, Utc};

/// Furthest a start or stop time may lie ahead of now
pub const MAX_AHEAD_SECS: i64 = 60 * 60 * 24 * 100;

/// Resolve `input` to unix seconds relative to `created_at_ms`
pub fn parse_relative_time(input: &str, created_at_ms: i64) -> Result<i64, ValidationError> {
    if input == "now" {
        return Ok(created_at_ms.div_euclid(1000));
    }

    let format_error = || ValidationError::TimeFormat(input.to_string());

    let offset = input.strip_prefix('+').ok_or_else(format_error)?;
    let unit = offset.chars().last().ok_or_else(format_error)?;
    let digits = &offset[..offset.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error());
    }

    let value: i64 = digits.parse().map_err(|_| format_error())?;
    let unit_ms: i64 = match unit {
        'm' => 60 * 1000,
        'h' => 60 * 60 * 1000,
        'd' => 24 * 60 * 60 * 1000,
        _ => return Err(format_error()),
    };

    let offset_ms = value.checked_mul(unit_ms).ok_or_else(format_error)?;
    let at_ms = created_at_ms.checked_add(offset_ms).ok_or_else(format_error)?;
    Ok(at_ms.div_euclid(1000))
}

/// `start < stop`, and neither more than 100 days past `now_secs`
pub fn is_valid_time_range(start: i64, stop: i64, now_secs: i64) -> bool {
    start < stop && start - now_secs <= MAX_AHEAD_SECS && stop - now_secs <= MAX_AHEAD_SECS
}

pub fn validate_time_range(start: i64, stop: i64, now_secs: i64) -> Result<(), ValidationError> {
    if is_valid_time_range(start, stop, now_secs) {
        Ok(())
    } else {
        Err(ValidationError::TimeRange)
    }
}

/// Render unix seconds for display, e.g. `Jan 5, 2024, 13:04:05`
pub fn format_epoch(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(at) => at.format("%b %-d, %Y, %H:%M:%S").to_string(),
        None => secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000_123;

    #[test]
    fn test_now_floors_to_seconds() {
        assert_eq!(parse_relative_time("now", T).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_relative_offsets() {
        assert_eq!(parse_relative_time("+12h", T).unwrap(), 1_700_000_000 + 43_200);
        assert_eq!(parse_relative_time("+30m", T).unwrap(), 1_700_000_000 + 1_800);
        assert_eq!(parse_relative_time("+2d", T).unwrap(), 1_700_000_000 + 172_800);
        assert_eq!(parse_relative_time("+0m", T).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        for input in ["+12x", "12h", "", "+h", "+", "+1.5h", "+-2h", "Now", " now", "+12h "] {
            assert!(
                matches!(
                    parse_relative_time(input, T),
                    Err(ValidationError::TimeFormat(ref s)) if s == input
                ),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_overflowing_offset_is_rejected() {
        assert!(parse_relative_time("+99999999999999999d", T).is_err());
    }

    #[test]
    fn test_time_range() {
        let now = 1_700_000_000;
        assert!(is_valid_time_range(now, now + 60, now));
        assert!(!is_valid_time_range(now + 60, now + 60, now));
        assert!(!is_valid_time_range(now + 60, now, now));
        assert!(is_valid_time_range(now, now + MAX_AHEAD_SECS, now));
        assert!(!is_valid_time_range(now, now + MAX_AHEAD_SECS + 1, now));
        assert!(!is_valid_time_range(now + MAX_AHEAD_SECS + 1, now + MAX_AHEAD_SECS + 2, now));
        assert!(matches!(
            validate_time_range(now, now, now),
            Err(ValidationError::TimeRange)
        ));
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(1_704_459_845), "Jan 5, 2024, 13:04:05");
    }
}
