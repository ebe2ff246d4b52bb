//! Due-node predicate: cron schedules with interval fallback.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use crate::types::RefreshPolicy;

/// Parse an interval expression: `"90s"`, `"15m"`, `"2h"`, `"1d"`, or a bare
/// number of seconds.
#[must_use]
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<i64>() {
        return (secs > 0).then(|| Duration::seconds(secs));
    }
    if !s.is_char_boundary(s.len() - 1) {
        return None;
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let value: i64 = num.trim().parse().ok()?;
    if value <= 0 {
        return None;
    }
    match unit {
        "s" => Some(Duration::seconds(value)),
        "m" => Some(Duration::minutes(value)),
        "h" => Some(Duration::hours(value)),
        "d" => Some(Duration::days(value)),
        _ => None,
    }
}

/// Parse a standard 5-field cron expression.
///
/// The `cron` crate wants a seconds field, so 5-field expressions are
/// prefixed with `0`; 6-field expressions pass through unchanged.
#[must_use]
pub fn parse_cron(expr: &str) -> Option<Schedule> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).ok()
}

/// Whether a node is due for refresh.
///
/// Cron takes precedence: due when the next fire time after `last_refreshed`
/// has passed. A cron expression that fails to parse falls back to interval
/// semantics. A node that has never been refreshed is due as soon as it has
/// any valid policy. With neither a valid cron nor a valid interval, the
/// node is never due.
#[must_use]
pub fn is_due(
    policy: &RefreshPolicy,
    last_refreshed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if let Some(expr) = policy.cron.as_deref() {
        if let Some(schedule) = parse_cron(expr) {
            let Some(last) = last_refreshed else {
                return true;
            };
            return schedule.after(&last).next().is_some_and(|fire| fire <= now);
        }
        debug!(cron = expr, "invalid cron expression, falling back to interval");
    }

    if let Some(interval) = policy.interval.as_deref().and_then(parse_interval) {
        let Some(last) = last_refreshed else {
            return true;
        };
        return now - last >= interval;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(interval: Option<&str>, cron: Option<&str>) -> RefreshPolicy {
        RefreshPolicy {
            interval: interval.map(String::from),
            cron: cron.map(String::from),
            drift_threshold: None,
        }
    }

    #[test]
    fn interval_formats_parse() {
        assert_eq!(parse_interval("90s"), Some(Duration::seconds(90)));
        assert_eq!(parse_interval("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_interval("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_interval("1d"), Some(Duration::days(1)));
        assert_eq!(parse_interval("45"), Some(Duration::seconds(45)));
        assert_eq!(parse_interval("nope"), None);
        assert_eq!(parse_interval("-5s"), None);
    }

    #[test]
    fn five_field_cron_is_accepted() {
        assert!(parse_cron("*/5 * * * *").is_some());
        assert!(parse_cron("0 0 * * 0").is_some());
        assert!(parse_cron("not a cron").is_none());
    }

    #[test]
    fn interval_due_semantics() {
        let now = Utc::now();
        let p = policy(Some("1m"), None);
        assert!(is_due(&p, Some(now - Duration::seconds(61)), now));
        assert!(!is_due(&p, Some(now - Duration::seconds(30)), now));
        assert!(is_due(&p, None, now));
    }

    #[test]
    fn cron_due_semantics() {
        let now = Utc::now();
        // Every minute: a node refreshed two minutes ago is due
        let p = policy(None, Some("* * * * *"));
        assert!(is_due(&p, Some(now - Duration::minutes(2)), now));
        assert!(!is_due(&p, Some(now), now));
    }

    #[test]
    fn invalid_cron_falls_back_to_interval() {
        let now = Utc::now();
        let p = policy(Some("1m"), Some("not a cron"));
        let pure_interval = policy(Some("1m"), None);
        for ago in [10, 59, 60, 61, 3600] {
            let last = Some(now - Duration::seconds(ago));
            assert_eq!(is_due(&p, last, now), is_due(&pure_interval, last, now));
        }
    }

    #[test]
    fn invalid_cron_without_interval_is_never_due() {
        let now = Utc::now();
        let p = policy(None, Some("bad expr"));
        assert!(!is_due(&p, Some(now - Duration::days(365)), now));
        assert!(!is_due(&p, None, now));
    }

    #[test]
    fn empty_policy_is_never_due() {
        let now = Utc::now();
        assert!(!is_due(&policy(None, None), None, now));
    }
}
