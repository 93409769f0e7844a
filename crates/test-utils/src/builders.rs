#![allow(dead_code)]

use std::time::Duration;

use pipetick::config::{PipelineConfig, RawConfigFile, TaskConfig};
use pipetick::dag::TaskDescriptor;
use pipetick::errors::Result;
use pipetick::types::HistoryStorageMode;

/// Builder for `PipelineConfig` to simplify test setup.
///
/// Defaults: 5 minute interval from 2024-01-01, in-memory history, library
/// defaults for everything else.
pub struct PipelineConfigBuilder {
    config: RawConfigFile,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.schedule.start = Some("2024-01-01T00:00:00Z".to_string());
        config.runtime.history = HistoryStorageMode::Memory;
        Self { config }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn interval(mut self, interval: &str) -> Self {
        self.config.schedule.interval = interval.to_string();
        self
    }

    pub fn start(mut self, start: &str) -> Self {
        self.config.schedule.start = Some(start.to_string());
        self
    }

    pub fn max_concurrent_runs(mut self, n: usize) -> Self {
        self.config.schedule.max_concurrent_runs = Some(n);
        self
    }

    pub fn worker_pool_size(mut self, n: usize) -> Self {
        self.config.runtime.worker_pool_size = n;
        self
    }

    pub fn default_retries(mut self, n: u32) -> Self {
        self.config.default.retries = Some(n);
        self
    }

    pub fn default_retry_delay(mut self, delay: &str) -> Self {
        self.config.default.retry_delay = Some(delay.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<PipelineConfig> {
        PipelineConfig::try_from(self.config)
    }

    pub fn build(self) -> PipelineConfig {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str, action: &str) -> Self {
        Self {
            task: TaskConfig::new(name, action),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.task.retries = Some(n);
        self
    }

    pub fn retry_delay(mut self, delay: &str) -> Self {
        self.task.retry_delay = Some(delay.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.task.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// A descriptor with no retries, no delay and no timeout.
pub fn descriptor(name: &str, deps: &[&str]) -> TaskDescriptor {
    TaskDescriptor {
        name: name.to_string(),
        action: format!("run {name}"),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        max_retries: 0,
        retry_delay: Duration::ZERO,
        timeout: None,
    }
}
