pub mod config;
pub mod core;
pub mod events;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{
    ConfigError, ControllerConfig, ScheduleManifest, ScheduleManifestBuilder, YamlLoader,
    load_schedules_from_directory,
};
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::evaluator::{EvaluationError, UnmetFirings, unmet_firings};
pub use core::object::{
    ChildJob, ChildRef, ConcurrencyPolicy, JobOutcome, JobTemplate, ScheduleObject, ScheduleSpec,
    ScheduleStatus,
};
pub use core::policy::{Decision, PolicyContext, Resolution, SkipReason};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{ObjectKey, Uid};
pub use events::{Event, EventBus, EventHandler};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerState, SyncOutcome, SyncReport};
pub use storage::{InMemoryStorage, Storage, StorageError};
