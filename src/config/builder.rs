//! Builder for converting manifests into schedule objects.
//!
//! This module bridges the gap between YAML manifests and the stored
//! object model used by the scheduler.

use chrono::{DateTime, Utc};
use std::path::Path;

use super::error::ConfigError;
use super::types::{CONTROLLER_CONFIG_FILE, ScheduleManifest};
use super::yaml::YamlLoader;
use crate::core::object::ScheduleObject;
use crate::core::types::ObjectKey;

/// Builds schedule objects from manifests.
#[derive(Debug, Clone)]
pub struct ScheduleManifestBuilder {
    created_at: DateTime<Utc>,
    default_time_zone: Option<String>,
}

impl ScheduleManifestBuilder {
    /// Objects built by this builder are stamped as created at `created_at`.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            default_time_zone: None,
        }
    }

    /// Time zone applied to manifests that do not set one.
    pub fn with_default_time_zone(mut self, tz: Option<String>) -> Self {
        self.default_time_zone = tz;
        self
    }

    /// Build a schedule object from a manifest.
    pub fn build(&self, manifest: ScheduleManifest) -> Result<ScheduleObject, ConfigError> {
        let mut spec = manifest.spec;
        if spec.time_zone.is_none() {
            spec.time_zone = self.default_time_zone.clone();
        }
        spec.parse_schedule().map_err(|e| {
            ConfigError::InvalidConfig(format!("schedule '{}': {}", manifest.name, e))
        })?;

        Ok(ScheduleObject::new(
            ObjectKey::new(manifest.namespace, manifest.name),
            spec,
            self.created_at,
        ))
    }
}

/// Load all schedule manifests from a directory.
///
/// Reads every `.yaml`/`.yml` file except the controller settings file.
/// Results are ordered by file name. Two manifests with the same namespace
/// and name are rejected.
pub fn load_schedules_from_directory(
    dir: impl AsRef<Path>,
    builder: &ScheduleManifestBuilder,
) -> Result<Vec<ScheduleObject>, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let read_dir_err = |source: std::io::Error| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_err)? {
        let path = entry.map_err(read_dir_err)?.path();

        // Only process .yaml and .yml files
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
            && path.file_name().is_none_or(|name| name != CONTROLLER_CONFIG_FILE)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut schedules: Vec<ScheduleObject> = Vec::with_capacity(paths.len());
    for path in paths {
        let manifest = YamlLoader::load_manifest(&path)?;
        let schedule = builder.build(manifest)?;
        if schedules.iter().any(|s| s.key == schedule.key) {
            return Err(ConfigError::InvalidConfig(format!(
                "duplicate schedule '{}' in '{}'",
                schedule.key,
                path.display()
            )));
        }
        tracing::debug!(schedule = %schedule.key, path = %path.display(), "Loaded schedule manifest");
        schedules.push(schedule);
    }

    Ok(schedules)
}
