// src/config/mod.rs

//! Configuration loading and validation for pipetick.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse human-friendly durations such as `"5m"` (`duration.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into a typed [`PipelineConfig`] (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    DefaultSection, PipelineConfig, RawConfigFile, RuntimeSection, RuntimeSettings,
    ScheduleSection, ScheduleSettings, TaskConfig,
};
