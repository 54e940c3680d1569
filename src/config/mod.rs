//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for schedule manifests and
//! controller settings.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{ScheduleManifestBuilder, load_schedules_from_directory};
pub use error::ConfigError;
pub use types::{CONTROLLER_CONFIG_FILE, ControllerConfig, DEFAULT_NAMESPACE, ScheduleManifest};
pub use yaml::YamlLoader;
