//! Concurrency and deadline policy.
//!
//! Turns the output of the evaluator plus the set of running children into a
//! single [`Decision`] and the time to record as the last schedule time once
//! that decision has been carried out. Pure: no clock, no store.

use chrono::{DateTime, Utc};
use std::fmt;

use super::evaluator::UnmetFirings;
use super::object::{ChildRef, ConcurrencyPolicy};

/// Why a firing was not launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Children were still running under `Forbid`.
    ConcurrencyPolicy,
    /// The firing was older than the starting deadline.
    MissedDeadline,
    /// The schedule could not be evaluated.
    Error,
}

impl SkipReason {
    /// Label value used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ConcurrencyPolicy => "concurrencyPolicy",
            SkipReason::MissedDeadline => "missedDeadline",
            SkipReason::Error => "error",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Launch a child for `scheduled_time`.
    Fire { scheduled_time: DateTime<Utc> },
    /// Delete `superseded`, then launch a child for `scheduled_time`.
    ReplaceAndFire {
        superseded: Vec<ChildRef>,
        scheduled_time: DateTime<Utc>,
    },
    SkipConcurrencyPolicy { scheduled_time: DateTime<Utc> },
    SkipMissedDeadline { scheduled_time: DateTime<Utc> },
    SkipError { reason: String },
}

impl Decision {
    /// Firing the decision refers to, if any.
    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::Fire { scheduled_time }
            | Decision::ReplaceAndFire { scheduled_time, .. }
            | Decision::SkipConcurrencyPolicy { scheduled_time }
            | Decision::SkipMissedDeadline { scheduled_time } => Some(*scheduled_time),
            Decision::SkipError { .. } => None,
        }
    }

    /// Skip reason for skip decisions, `None` for launches.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Decision::Fire { .. } | Decision::ReplaceAndFire { .. } => None,
            Decision::SkipConcurrencyPolicy { .. } => Some(SkipReason::ConcurrencyPolicy),
            Decision::SkipMissedDeadline { .. } => Some(SkipReason::MissedDeadline),
            Decision::SkipError { .. } => Some(SkipReason::Error),
        }
    }

    pub fn launches(&self) -> bool {
        self.skip_reason().is_none()
    }
}

/// A decision together with the time to record once it has been executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Option<Decision>,
    pub record: Option<DateTime<Utc>>,
}

impl Resolution {
    fn new(decision: Option<Decision>, record: Option<DateTime<Utc>>) -> Self {
        Self { decision, record }
    }
}

/// Inputs the policy needs besides the unmet firings.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub concurrency_policy: ConcurrencyPolicy,
    pub suspend: bool,
    /// Children launched by this schedule that have not finished.
    pub active: &'a [ChildRef],
    /// Firing times that already have a child, finished or not.
    pub launched: &'a [DateTime<Utc>],
}

impl PolicyContext<'_> {
    /// Decide what to do about `unmet`.
    ///
    /// Only the latest unmet firing is ever acted on. Earlier ones in the
    /// same batch are dropped and recorded past, so a schedule never runs a
    /// backlog.
    pub fn decide(&self, unmet: &UnmetFirings) -> Resolution {
        if self.suspend {
            return Resolution::new(None, unmet.cursor());
        }

        let Some(candidate) = unmet.latest() else {
            return match unmet.expired {
                Some(expired) => Resolution::new(
                    Some(Decision::SkipMissedDeadline {
                        scheduled_time: expired,
                    }),
                    Some(expired),
                ),
                None => Resolution::default(),
            };
        };

        if self.launched.contains(&candidate) {
            return Resolution::new(None, Some(candidate));
        }

        let decision = if self.active.is_empty() {
            Decision::Fire {
                scheduled_time: candidate,
            }
        } else {
            match self.concurrency_policy {
                ConcurrencyPolicy::Allow => Decision::Fire {
                    scheduled_time: candidate,
                },
                ConcurrencyPolicy::Forbid => Decision::SkipConcurrencyPolicy {
                    scheduled_time: candidate,
                },
                ConcurrencyPolicy::Replace => Decision::ReplaceAndFire {
                    superseded: self.active.to_vec(),
                    scheduled_time: candidate,
                },
            }
        };

        Resolution::new(Some(decision), Some(candidate))
    }

    /// Decision for a schedule that could not be evaluated.
    ///
    /// Progress is still recorded up to `now` so the same failure is not
    /// re-evaluated on every tick.
    pub fn decide_on_error(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Resolution {
        if self.suspend {
            return Resolution::new(None, Some(now));
        }
        Resolution::new(
            Some(Decision::SkipError {
                reason: reason.into(),
            }),
            Some(now),
        )
    }
}
