//! Missed-firing evaluation.
//!
//! Given a parsed [`Schedule`] and an interval `(start, end]`, these functions
//! report which recurrence points fell inside it. Bounds are exclusive below
//! and inclusive above everywhere in this module.
//!
//! Two strategies are provided:
//!
//! - **Linear** ([`missed_firings`], [`latest_missed`]): walk the recurrence
//!   from `start` until it passes `end`. Cost grows with the number of
//!   firings in the interval.
//! - **Binary search** ([`latest_missed_binary_search`]): find only the latest
//!   firing by searching over whole-second offsets from `start`. Cost grows
//!   with the log of the interval length, so a minutely schedule that was
//!   unattended for years is still cheap to resolve.
//!
//! Both strategies agree on the latest firing and on whether any firing
//! exists; the property tests hold them to that.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::schedule::Schedule;

/// Firings tolerated in a single evaluation before giving up.
pub const DEFAULT_MAX_MISSED_SCHEDULES: usize = 100;

/// Errors raised while evaluating missed firings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// More firings fell in the evaluation window than the configured limit.
    #[error(
        "too many missed start times (> {limit}); set or decrease the starting deadline or check clock skew"
    )]
    TooManyMissedSchedules { limit: usize },
}

/// Latest firing found by the linear strategy, with the number of firings
/// seen on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestMissed {
    pub at: DateTime<Utc>,
    pub count: usize,
}

/// Every recurrence point in `(start, end]`, ascending.
///
/// Unbounded: callers that cannot trust the interval length should use
/// [`unmet_firings`] or [`latest_missed_binary_search`].
pub fn missed_firings(
    schedule: &Schedule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut firings = Vec::new();
    let mut cursor = start;
    while let Some(next) = schedule.next_after(cursor) {
        if next > end {
            break;
        }
        firings.push(next);
        cursor = next;
    }
    firings
}

/// Latest recurrence point in `(start, end]` found by walking every firing.
pub fn latest_missed(
    schedule: &Schedule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<LatestMissed> {
    let mut latest = None;
    let mut count = 0;
    let mut cursor = start;
    while let Some(next) = schedule.next_after(cursor) {
        if next > end {
            break;
        }
        count += 1;
        latest = Some(next);
        cursor = next;
    }
    latest.map(|at| LatestMissed { at, count })
}

/// Latest recurrence point in `(start, end]` found by binary search.
///
/// Whether a firing exists in `(start + d, end]` is monotonic in the offset
/// `d`: true up to the second before the latest firing, false from then on.
/// The search finds the largest whole-second `d` for which it is true, and
/// the firing right after `start + d` is the answer. A probe that lands
/// exactly on a firing excludes it, since the probed interval is open below.
pub fn latest_missed_binary_search(
    schedule: &Schedule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if end <= start {
        return None;
    }

    let fires_after = |offset: i64| {
        schedule
            .next_after(start + Duration::seconds(offset))
            .is_some_and(|next| next <= end)
    };

    if !fires_after(0) {
        return None;
    }

    // Invariant: fires_after(lo) holds and fires_after(hi) does not.
    let mut lo = 0_i64;
    let mut hi = (end - start).num_seconds() + 1;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if fires_after(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    schedule.next_after(start + Duration::seconds(lo))
}

/// Firings due at one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmetFirings {
    /// Firings inside the starting-deadline window, ascending.
    pub firings: Vec<DateTime<Utc>>,
    /// Latest firing that fell before the starting-deadline window.
    pub expired: Option<DateTime<Utc>>,
}

impl UnmetFirings {
    /// The firing a decision would act on.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.firings.last().copied()
    }

    /// True when nothing is due and nothing expired.
    pub fn is_empty(&self) -> bool {
        self.firings.is_empty() && self.expired.is_none()
    }

    /// Number of in-window firings that will not be acted on.
    pub fn discarded(&self) -> usize {
        self.firings.len().saturating_sub(1)
    }

    /// Latest firing of any kind; recording it consumes everything reported.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.latest().or(self.expired)
    }
}

/// Firings strictly after `since` and at or before `now`.
///
/// With a starting deadline, firings older than `now - deadline` are not
/// returned in [`UnmetFirings::firings`]; the latest of them is returned in
/// [`UnmetFirings::expired`] so the caller can move past it. The expired
/// firing is located by binary search, so an arbitrarily old `since` costs
/// nothing extra.
///
/// Fails with [`EvaluationError::TooManyMissedSchedules`] when more than
/// `max_missed` firings fall inside the window.
pub fn unmet_firings(
    schedule: &Schedule,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    starting_deadline: Option<Duration>,
    max_missed: usize,
) -> Result<UnmetFirings, EvaluationError> {
    let mut unmet = UnmetFirings::default();
    if now <= since {
        return Ok(unmet);
    }

    let mut window_start = since;
    if let Some(cutoff) = starting_deadline.and_then(|d| now.checked_sub_signed(d))
        && cutoff > since
    {
        unmet.expired = latest_missed_binary_search(schedule, since, cutoff);
        window_start = cutoff;
    }

    let mut cursor = window_start;
    while let Some(next) = schedule.next_after(cursor) {
        if next > now {
            break;
        }
        unmet.firings.push(next);
        if unmet.firings.len() > max_missed {
            return Err(EvaluationError::TooManyMissedSchedules { limit: max_missed });
        }
        cursor = next;
    }

    Ok(unmet)
}
