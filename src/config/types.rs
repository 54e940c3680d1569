//! Configuration type definitions.
//!
//! This module contains the type definitions for the controller settings file
//! and for schedule manifests.

use serde::{Deserialize, Serialize};

use crate::core::evaluator::DEFAULT_MAX_MISSED_SCHEDULES;
use crate::core::object::ScheduleSpec;

/// File name of the controller settings when kept next to the manifests.
pub const CONTROLLER_CONFIG_FILE: &str = "cadence.yaml";

/// Namespace used by manifests that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Controller settings (cadence.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between reconciliation passes.
    pub tick_interval_secs: u64,
    /// Schedule objects reconciled concurrently.
    pub workers: usize,
    /// Unmet firings tolerated before a schedule is reported as broken.
    pub max_missed_schedules: usize,
    /// Time budget for one pass in seconds.
    pub pass_timeout_secs: Option<u64>,
    /// Time zone for manifests that do not set one.
    pub default_time_zone: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            workers: 4,
            max_missed_schedules: DEFAULT_MAX_MISSED_SCHEDULES,
            pass_timeout_secs: None,
            default_time_zone: None,
        }
    }
}

/// A schedule object as written in a YAML manifest.
///
/// ```yaml
/// name: nightly-report
/// namespace: reports
/// schedule: "0 2 * * *"
/// time_zone: Europe/Berlin
/// concurrency_policy: Forbid
/// starting_deadline_seconds: 300
/// job_template:
///   labels:
///     team: data
///   payload:
///     command: ["report", "--nightly"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleManifest {
    /// Object name, unique within its namespace.
    pub name: String,
    /// Object namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(flatten)]
    pub spec: ScheduleSpec,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
