//! Configuration file loading, environment overrides, and the persisted-
//! state path layout for the AIOS control plane (spec §6).

mod config;
mod error;
mod paths;
mod schema;

pub use config::{apply_env_overrides, config_file_path, home_dir, load, load_from_file};
pub use error::{ConfigError, Result};
pub use paths::StatePaths;
pub use schema::{AiosConfig, BreakerSettings, MetricThreshold};
