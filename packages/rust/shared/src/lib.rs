//! Shared types, error model, and configuration for PageWatch.
//!
//! This crate is the foundation depended on by all other PageWatch crates.
//! It provides:
//! - [`PageWatchError`] and [`FetchError`]: the error taxonomy
//! - Domain types ([`MonitoredTarget`], [`Observation`], [`TargetId`], [`FetchSpec`])
//! - Weekly schedules ([`Schedule`], [`Weekday`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchConfig, FetchSection, GenerationConfig, GenerationSection, ScheduleTimezone,
    SchedulerConfig, SchedulerSection, StorageSection, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{FetchError, PageWatchError, Result};
pub use schedule::{Schedule, Weekday, parse_api_days, parse_time_of_day};
pub use types::{FetchSpec, MonitoredTarget, Observation, TargetId};
