//! Runtime configuration: a TOML file with command line overrides.

pub mod config;
pub mod types;

pub use config::{Args, Config};
pub use types::{AdminConfig, ScenarioConfig, ServerConfig, StorageConfig, StudyConfig};
