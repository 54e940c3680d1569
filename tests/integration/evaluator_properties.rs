//! Property-based tests for missed-firing search.
//!
//! These tests use proptest to check that the binary search agrees with the
//! linear walk across randomly generated expressions and intervals.

use cadence::Schedule;
use cadence::core::evaluator::{latest_missed, latest_missed_binary_search, unmet_firings};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

/// Generates a schedule expression from a fixed, varied set.
fn arb_expression() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "* * * * *",
        "*/7 * * * *",
        "0 * * * *",
        "15,45 */2 * * *",
        "30 9 * * 1-5",
        "0 0 * * 0",
        "0 0 1 * *",
        "0 12 13 * 5",
    ])
}

/// Generates a time zone without daylight-saving transitions.
fn arb_time_zone() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["UTC", "Asia/Kolkata", "Asia/Tokyo", "America/Phoenix"])
}

/// Generates a start instant within 2024, at arbitrary seconds.
fn arb_start() -> impl Strategy<Value = DateTime<Utc>> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0i64..366 * 24 * 3600).prop_map(move |offset| base + Duration::seconds(offset))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn binary_search_matches_linear_walk(
        expression in arb_expression(),
        tz in arb_time_zone(),
        start in arb_start(),
        span_secs in 0i64..3 * 24 * 3600,
    ) {
        let schedule = Schedule::with_timezone(expression, tz).unwrap();
        let end = start + Duration::seconds(span_secs);

        let linear = latest_missed(&schedule, start, end).map(|m| m.at);
        let searched = latest_missed_binary_search(&schedule, start, end);
        prop_assert_eq!(linear, searched);
    }

    #[test]
    fn unmet_firings_are_in_window_and_ascending(
        expression in arb_expression(),
        start in arb_start(),
        span_secs in 1i64..2 * 24 * 3600,
        deadline_secs in prop::option::of(1i64..6 * 3600),
    ) {
        let schedule = Schedule::new(expression).unwrap();
        let now = start + Duration::seconds(span_secs);
        let deadline = deadline_secs.map(Duration::seconds);

        let unmet = unmet_firings(&schedule, start, now, deadline, 10_000).unwrap();
        let window_start = deadline.map_or(start, |d| (now - d).max(start));

        prop_assert!(unmet.firings.windows(2).all(|w| w[0] < w[1]));
        for at in &unmet.firings {
            prop_assert!(*at > window_start && *at <= now);
        }
        if let Some(expired) = unmet.expired {
            prop_assert!(expired > start && expired <= window_start);
        }
        prop_assert_eq!(
            unmet.cursor(),
            latest_missed_binary_search(&schedule, start, now)
        );
    }
}
