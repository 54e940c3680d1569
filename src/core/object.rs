//! Stored object model: schedule objects and the child jobs they spawn.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schedule::{Schedule, ScheduleError};
use super::types::{ObjectKey, Uid};

/// Kind recorded on owner references that point at a schedule object.
pub const SCHEDULE_KIND: &str = "Schedule";

/// Annotation carrying the firing time a child job was launched for.
pub const SCHEDULED_TIME_ANNOTATION: &str = "cadence.io/scheduled-at";

/// Longest schedule name that still leaves room for the child name suffix.
pub const MAX_SCHEDULE_NAME_LEN: usize = 52;

/// Finished children of each outcome kept when a spec leaves the limit unset.
pub const DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT: u32 = 3;
pub const DEFAULT_FAILED_JOBS_HISTORY_LIMIT: u32 = 1;

/// How a new firing interacts with children that are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Launch alongside running children.
    #[default]
    #[serde(alias = "allow")]
    Allow,
    /// Skip the firing while any child is running.
    #[serde(alias = "forbid")]
    Forbid,
    /// Delete running children, then launch.
    #[serde(alias = "replace")]
    Replace,
}

impl ConcurrencyPolicy {
    /// Name used in logs and manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Allow => "Allow",
            ConcurrencyPolicy::Forbid => "Forbid",
            ConcurrencyPolicy::Replace => "Replace",
        }
    }
}

/// Template copied onto every child job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTemplate {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Runtime limit handed to whatever executes the child.
    pub active_deadline_seconds: Option<u64>,
    /// Opaque work description, never interpreted by the controller.
    pub payload: serde_json::Value,
}

/// Desired behaviour of a schedule object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Cron expression or shortcut.
    pub schedule: String,
    /// IANA time zone the expression is evaluated in (UTC when absent).
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    /// Firings older than this many seconds are skipped instead of launched.
    #[serde(default)]
    pub starting_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default)]
    pub successful_jobs_history_limit: Option<u32>,
    #[serde(default)]
    pub failed_jobs_history_limit: Option<u32>,
    #[serde(default)]
    pub job_template: JobTemplate,
}

impl ScheduleSpec {
    /// Create a spec with default policy for the given expression.
    pub fn new(schedule: impl Into<String>) -> Self {
        Self {
            schedule: schedule.into(),
            time_zone: None,
            concurrency_policy: ConcurrencyPolicy::default(),
            starting_deadline_seconds: None,
            suspend: false,
            successful_jobs_history_limit: None,
            failed_jobs_history_limit: None,
            job_template: JobTemplate::default(),
        }
    }

    /// Parse the expression in the configured time zone.
    pub fn parse_schedule(&self) -> Result<Schedule, ScheduleError> {
        Schedule::with_timezone(
            self.schedule.as_str(),
            self.time_zone.as_deref().unwrap_or("UTC"),
        )
    }

    /// The starting deadline as a duration, `None` when unbounded.
    pub fn starting_deadline(&self) -> Option<Duration> {
        self.starting_deadline_seconds.map(|secs| {
            i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX)
        })
    }

    /// Number of succeeded children to keep.
    pub fn successful_history_limit(&self) -> usize {
        self.successful_jobs_history_limit
            .unwrap_or(DEFAULT_SUCCESSFUL_JOBS_HISTORY_LIMIT) as usize
    }

    /// Number of failed children to keep.
    pub fn failed_history_limit(&self) -> usize {
        self.failed_jobs_history_limit
            .unwrap_or(DEFAULT_FAILED_JOBS_HISTORY_LIMIT) as usize
    }
}

/// Reference to an unfinished child, kept in [`ScheduleStatus::active`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    pub name: String,
    pub uid: Uid,
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl From<&ChildJob> for ChildRef {
    fn from(child: &ChildJob) -> Self {
        Self {
            name: child.key.name.clone(),
            uid: child.uid.clone(),
            scheduled_time: child.scheduled_time,
        }
    }
}

/// Observed state of a schedule object, written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleStatus {
    /// Most recent firing this controller acted on.
    pub last_schedule_time: Option<DateTime<Utc>>,
    /// Completion time of the most recent succeeded child.
    pub last_successful_time: Option<DateTime<Utc>>,
    /// Children launched by this schedule that have not finished.
    pub active: Vec<ChildRef>,
}

impl ScheduleStatus {
    /// Advance `last_schedule_time`; never moves it backwards.
    ///
    /// Returns true when the recorded time changed.
    pub fn record_schedule_time(&mut self, at: DateTime<Utc>) -> bool {
        if self.last_schedule_time.is_none_or(|last| at > last) {
            self.last_schedule_time = Some(at);
            return true;
        }
        false
    }

    /// Advance `last_successful_time`; never moves it backwards.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        if self.last_successful_time.is_none_or(|last| at > last) {
            self.last_successful_time = Some(at);
        }
    }

    pub fn is_active(&self, uid: &Uid) -> bool {
        self.active.iter().any(|r| &r.uid == uid)
    }

    /// Remove a child from the active list. Returns true if it was present.
    pub fn remove_active(&mut self, uid: &Uid) -> bool {
        let before = self.active.len();
        self.active.retain(|r| &r.uid != uid);
        self.active.len() != before
    }
}

/// A recurring job definition plus its observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleObject {
    pub key: ObjectKey,
    pub uid: Uid,
    pub creation_timestamp: DateTime<Utc>,
    pub spec: ScheduleSpec,
    #[serde(default)]
    pub status: ScheduleStatus,
}

impl ScheduleObject {
    /// Create a new object with a generated uid and empty status.
    pub fn new(key: ObjectKey, spec: ScheduleSpec, creation_timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            uid: Uid::generate(),
            creation_timestamp,
            spec,
            status: ScheduleStatus::default(),
        }
    }

    /// Controller reference stamped on every child of this schedule.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: SCHEDULE_KIND.to_string(),
            uid: self.uid.clone(),
            controller: true,
        }
    }
}

/// Back-reference from a child to an owning object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub uid: Uid,
    /// Whether the owner manages this child's lifecycle.
    #[serde(default)]
    pub controller: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobConditionKind {
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCondition {
    pub kind: JobConditionKind,
    pub status: bool,
}

/// Terminal result of a child job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
        }
    }
}

/// A unit of work launched for one firing of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildJob {
    pub key: ObjectKey,
    pub uid: Uid,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Firing this child was launched for.
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub active_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChildJob {
    /// Create a bare child with no owner and no status.
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            uid: Uid::generate(),
            owner_references: Vec::new(),
            scheduled_time: None,
            start_time: None,
            completion_time: None,
            conditions: Vec::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            active_deadline_seconds: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Build the child for one firing of `parent` from its job template.
    ///
    /// The name is derived from the firing time, so launching the same
    /// firing twice yields the same key.
    pub fn from_template(parent: &ScheduleObject, scheduled_time: DateTime<Utc>) -> Self {
        let template = &parent.spec.job_template;
        let mut annotations = template.annotations.clone();
        annotations.insert(
            SCHEDULED_TIME_ANNOTATION.to_string(),
            scheduled_time.to_rfc3339(),
        );

        Self {
            key: ObjectKey::new(
                parent.key.namespace.clone(),
                child_name(&parent.key.name, scheduled_time),
            ),
            uid: Uid::generate(),
            owner_references: vec![parent.owner_reference()],
            scheduled_time: Some(scheduled_time),
            start_time: None,
            completion_time: None,
            conditions: Vec::new(),
            labels: template.labels.clone(),
            annotations,
            active_deadline_seconds: template.active_deadline_seconds,
            payload: template.payload.clone(),
        }
    }

    /// Terminal outcome, `None` while the child is still running.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.conditions
            .iter()
            .find(|c| c.status)
            .map(|c| match c.kind {
                JobConditionKind::Complete => JobOutcome::Succeeded,
                JobConditionKind::Failed => JobOutcome::Failed,
            })
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
    }

    /// Record a terminal outcome at `at`.
    pub fn mark_finished(&mut self, outcome: JobOutcome, at: DateTime<Utc>) {
        let kind = match outcome {
            JobOutcome::Succeeded => JobConditionKind::Complete,
            JobOutcome::Failed => JobConditionKind::Failed,
        };
        self.conditions.push(JobCondition { kind, status: true });
        self.completion_time = Some(at);
    }
}

/// Deterministic child name for one firing.
///
/// Firings on a whole minute are named `<schedule>-<unix minutes>`. Firings
/// of expressions with a seconds field can share a minute, so those are
/// named `<schedule>-<unix seconds>` instead; both suffixes fit in the 11
/// characters left by [`MAX_SCHEDULE_NAME_LEN`].
pub fn child_name(schedule_name: &str, scheduled_time: DateTime<Utc>) -> String {
    let secs = scheduled_time.timestamp();
    if secs.rem_euclid(60) == 0 && scheduled_time.timestamp_subsec_nanos() == 0 {
        format!("{}-{}", schedule_name, secs.div_euclid(60))
    } else {
        format!("{}-{}", schedule_name, secs)
    }
}
