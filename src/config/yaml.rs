//! YAML configuration parsing.
//!
//! Parses schedule manifests and controller settings from YAML files.

use chrono_tz::Tz;
use std::path::Path;

use super::error::ConfigError;
use super::types::{ControllerConfig, ScheduleManifest};
use crate::core::object::MAX_SCHEDULE_NAME_LEN;
use crate::core::schedule::Schedule;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load controller settings from a file.
    pub fn load_controller_config(path: impl AsRef<Path>) -> Result<ControllerConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let config: ControllerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_controller_config(&config)?;
        Ok(config)
    }

    /// Parse controller settings from a YAML string.
    pub fn parse_controller_config(yaml: &str) -> Result<ControllerConfig, ConfigError> {
        let config: ControllerConfig = serde_yaml::from_str(yaml)?;
        Self::validate_controller_config(&config)?;
        Ok(config)
    }

    /// Load a schedule manifest from a file.
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<ScheduleManifest, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let manifest: ScheduleManifest =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Parse a schedule manifest from a YAML string.
    pub fn parse_manifest(yaml: &str) -> Result<ScheduleManifest, ConfigError> {
        let manifest: ScheduleManifest = serde_yaml::from_str(yaml)?;
        Self::validate_manifest(&manifest)?;
        Ok(manifest)
    }

    fn validate_controller_config(config: &ControllerConfig) -> Result<(), ConfigError> {
        if config.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_secs cannot be zero".into(),
            ));
        }
        if config.workers == 0 {
            return Err(ConfigError::InvalidConfig("workers cannot be zero".into()));
        }
        if config.max_missed_schedules == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_missed_schedules cannot be zero".into(),
            ));
        }
        if let Some(tz) = &config.default_time_zone
            && tz.parse::<Tz>().is_err()
        {
            return Err(ConfigError::InvalidConfig(format!(
                "unknown default_time_zone '{}'",
                tz
            )));
        }
        Ok(())
    }

    /// Validate a schedule manifest.
    ///
    /// The schedule is parsed in the manifest's own time zone; a manifest
    /// without one is checked against UTC here and against the controller
    /// default when it is built.
    fn validate_manifest(manifest: &ScheduleManifest) -> Result<(), ConfigError> {
        if manifest.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if manifest.name.len() > MAX_SCHEDULE_NAME_LEN {
            return Err(ConfigError::InvalidConfig(format!(
                "name '{}' is longer than {} characters",
                manifest.name, MAX_SCHEDULE_NAME_LEN
            )));
        }
        if !is_valid_name(&manifest.name) {
            return Err(ConfigError::InvalidConfig(format!(
                "name '{}' must consist of lowercase alphanumerics and '-', and start and end with an alphanumeric",
                manifest.name
            )));
        }
        if manifest.namespace.is_empty() {
            return Err(ConfigError::MissingField("namespace".into()));
        }
        if manifest.spec.schedule.trim().is_empty() {
            return Err(ConfigError::MissingField("schedule".into()));
        }

        let tz = manifest.spec.time_zone.as_deref().unwrap_or("UTC");
        Schedule::with_timezone(manifest.spec.schedule.as_str(), tz).map_err(|e| {
            ConfigError::InvalidConfig(format!("schedule '{}': {}", manifest.name, e))
        })?;

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && bytes.iter().all(|b| edge_ok(b) || *b == b'-')
}
