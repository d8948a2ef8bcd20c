//! Natural-language time expression parser (spec §4.3 "Time filtering").
//!
//! Parses a small, fixed grammar of relative time expressions into an
//! `(after, before)` epoch-seconds window using the local clock. This is
//! deliberately not a general date-parsing library — the engine doesn't
//! need one, and the grammar is narrow enough that one regex-free parser
//! covers all of it without pulling in an NLP dependency.

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike};

use crate::error::EngineError;

/// A parsed time window, both bounds in unix-epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    /// Inclusive lower bound, if any.
    pub after: Option<f64>,
    /// Exclusive upper bound, if any.
    pub before: Option<f64>,
}

/// Parse a natural-language time expression relative to `now` (local time).
///
/// Recognizes: `"today"`, `"yesterday"`, `"this week"`, `"last week"`,
/// `"this month"`, `"last month"`, `"this year"`, `"N days ago"`,
/// `"N hours ago"`, `"N weeks ago"`. Case-insensitive, surrounding
/// whitespace ignored. Anything else is [`EngineError::InvalidTimeExpr`].
pub fn parse_time_expr(expr: &str, now: DateTime<Local>) -> Result<TimeWindow, EngineError> {
    let normalized = expr.trim().to_lowercase();

    match normalized.as_str() {
        "today" => Ok(day_window(now, 0)),
        "yesterday" => Ok(day_window(now, 1)),
        "this week" => Ok(TimeWindow {
            after: Some(start_of_week(now).timestamp() as f64),
            before: None,
        }),
        "last week" => {
            let this_week_start = start_of_week(now);
            let last_week_start = this_week_start - Duration::days(7);
            Ok(TimeWindow {
                after: Some(last_week_start.timestamp() as f64),
                before: Some(this_week_start.timestamp() as f64),
            })
        }
        "this month" => Ok(TimeWindow {
            after: Some(start_of_month(now).timestamp() as f64),
            before: None,
        }),
        "last month" => {
            let this_month_start = start_of_month(now);
            let last_month_start = if now.month() == 1 {
                Local
                    .with_ymd_and_hms(now.year() - 1, 12, 1, 0, 0, 0)
                    .single()
            } else {
                Local
                    .with_ymd_and_hms(now.year(), now.month() - 1, 1, 0, 0, 0)
                    .single()
            }
            .ok_or_else(|| EngineError::InvalidTimeExpr(expr.to_string()))?;
            Ok(TimeWindow {
                after: Some(last_month_start.timestamp() as f64),
                before: Some(this_month_start.timestamp() as f64),
            })
        }
        "this year" => {
            let start = Local
                .with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| EngineError::InvalidTimeExpr(expr.to_string()))?;
            Ok(TimeWindow {
                after: Some(start.timestamp() as f64),
                before: None,
            })
        }
        _ => parse_relative_ago(&normalized, now)
            .ok_or_else(|| EngineError::InvalidTimeExpr(expr.to_string())),
    }
}

/// Parse `"<N> <unit> ago"` (e.g. `"2 days ago"`, `"3 hours ago"`,
/// `"1 week ago"`). Returns an open-ended window: everything from that
/// instant up to now.
fn parse_relative_ago(s: &str, now: DateTime<Local>) -> Option<TimeWindow> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 3 || parts[2] != "ago" {
        return None;
    }

    let n: i64 = parts[0].parse().ok()?;
    let unit = parts[1].trim_end_matches('s');

    let delta = match unit {
        "second" => Duration::seconds(n),
        "minute" => Duration::minutes(n),
        "hour" => Duration::hours(n),
        "day" => Duration::days(n),
        "week" => Duration::weeks(n),
        "month" => Duration::days(n * 30),
        "year" => Duration::days(n * 365),
        _ => return None,
    };

    Some(TimeWindow {
        after: Some((now - delta).timestamp() as f64),
        before: None,
    })
}

fn day_window(now: DateTime<Local>, days_ago: i64) -> TimeWindow {
    let target = now - Duration::days(days_ago);
    let start = target
        .with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .unwrap_or(target);
    let end = start + Duration::days(1);
    TimeWindow {
        after: Some(start.timestamp() as f64),
        before: Some(end.timestamp() as f64),
    }
}

fn start_of_week(now: DateTime<Local>) -> DateTime<Local> {
    let days_since_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now - Duration::days(days_since_monday);
    monday
        .with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .unwrap_or(monday)
}

fn start_of_month(now: DateTime<Local>) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        // A Wednesday.
        Local.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_today_is_a_24h_window_containing_now() {
        let w = parse_time_expr("today", fixed_now()).unwrap();
        let now_epoch = fixed_now().timestamp() as f64;
        assert!(w.after.unwrap() <= now_epoch);
        assert!(w.before.unwrap() > now_epoch);
    }

    #[test]
    fn test_yesterday_window_precedes_today_window() {
        let yesterday = parse_time_expr("yesterday", fixed_now()).unwrap();
        let today = parse_time_expr("today", fixed_now()).unwrap();
        assert_eq!(yesterday.before, today.after);
    }

    #[test]
    fn test_n_days_ago_is_open_ended() {
        let w = parse_time_expr("2 days ago", fixed_now()).unwrap();
        assert!(w.before.is_none());
        let expected = (fixed_now() - Duration::days(2)).timestamp() as f64;
        assert_eq!(w.after, Some(expected));
    }

    #[test]
    fn test_unparseable_expression_is_an_error() {
        let result = parse_time_expr("the day the music died", fixed_now());
        assert!(matches!(result, Err(EngineError::InvalidTimeExpr(_))));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let a = parse_time_expr("Yesterday", fixed_now()).unwrap();
        let b = parse_time_expr("  yesterday  ", fixed_now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_last_week_precedes_this_week() {
        let last = parse_time_expr("last week", fixed_now()).unwrap();
        let this = parse_time_expr("this week", fixed_now()).unwrap();
        assert_eq!(last.before, this.after);
    }
}
