//! Parses the human-readable retry duration Antigravity embeds in quota-exhaustion
//! error bodies, e.g. `"...reset after 2h7m23s"`.
use std::time::Duration;

/// Extracts `{h}h{m}m{s}s` (each component optional, at least one required) from
/// free-form error text and returns the duration in milliseconds.
pub fn parse_retry_time(text: &str) -> Option<u64> {
    let idx = text.find("reset after")?;
    let rest = text[idx + "reset after".len()..].trim_start();

    let mut chars = rest.char_indices().peekable();
    let mut hours: Option<u64> = None;
    let mut minutes: Option<u64> = None;
    let mut seconds: Option<u64> = None;
    let mut num_start = None;

    while let Some((i, c)) = chars.next() {
        if c.is_ascii_digit() {
            if num_start.is_none() {
                num_start = Some(i);
            }
            continue;
        }
        let Some(start) = num_start.take() else {
            break;
        };
        let value: u64 = rest[start..i].parse().ok()?;
        match c {
            'h' => hours = Some(value),
            'm' => minutes = Some(value),
            's' => seconds = Some(value),
            _ => break,
        }
        if !matches!(chars.peek(), Some((_, next)) if next.is_ascii_digit()) {
            break;
        }
    }

    if hours.is_none() && minutes.is_none() && seconds.is_none() {
        return None;
    }

    let total_secs = hours.unwrap_or(0) * 3600 + minutes.unwrap_or(0) * 60 + seconds.unwrap_or(0);
    Some(total_secs * 1000)
}

pub fn parse_retry_duration(text: &str) -> Option<Duration> {
    parse_retry_time(text).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hours_minutes_seconds() {
        assert_eq!(
            parse_retry_time("reset after 2h7m23s"),
            Some(7_643_000)
        );
    }

    #[test]
    fn parses_embedded_in_longer_message() {
        assert_eq!(
            parse_retry_time("RESOURCE_EXHAUSTED: quota exceeded, reset after 2h7m23s, try again later"),
            Some(7_643_000)
        );
    }

    #[test]
    fn parses_seconds_only() {
        assert_eq!(parse_retry_time("reset after 45s"), Some(45_000));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(parse_retry_time("no match"), None);
    }

    #[test]
    fn missing_units_returns_none() {
        assert_eq!(parse_retry_time("reset after soon"), None);
    }
}
