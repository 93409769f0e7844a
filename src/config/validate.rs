// src/config/validate.rs

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::IntervalSchedule;
use crate::config::duration::parse_duration;
use crate::config::model::{
    DefaultSection, PipelineConfig, RawConfigFile, RuntimeSettings, ScheduleSettings, TaskConfig,
};
use crate::dag::{TaskDescriptor, TaskRegistry};
use crate::errors::{PipetickError, Result};
use crate::types::ConcurrencyLimit;

const DEFAULT_RETRIES: u32 = 1;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2 * 60);

impl TryFrom<RawConfigFile> for PipelineConfig {
    type Error = PipetickError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let schedule = validate_schedule(&raw)?;
        let runtime = validate_runtime(&raw)?;
        let tasks = resolve_tasks(&raw)?;

        // Fail fast on DAG problems (unknown deps, cycles) at load time.
        TaskRegistry::new(tasks.clone())?;

        Ok(PipelineConfig {
            schedule,
            runtime,
            tasks,
        })
    }
}

fn validate_schedule(cfg: &RawConfigFile) -> Result<ScheduleSettings> {
    let section = &cfg.schedule;

    let interval = parse_duration(&section.interval)
        .map_err(|e| config_error(format!("[schedule].interval: {e}")))?;
    if interval.is_zero() {
        return Err(config_error("[schedule].interval must be > 0"));
    }

    if section.catchup {
        return Err(config_error(
            "[schedule].catchup = true is not supported; missed periods are never backfilled",
        ));
    }

    let start = match section.start.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| config_error(format!("[schedule].start '{raw}' is not RFC 3339: {e}")))?,
        None => DateTime::<Utc>::UNIX_EPOCH,
    };

    // Same bounds the ticker will enforce, reported at load time.
    IntervalSchedule::new(start, interval)?;

    if section.max_concurrent_runs == Some(0) {
        return Err(config_error(
            "[schedule].max_concurrent_runs must be >= 1 (got 0)",
        ));
    }

    Ok(ScheduleSettings {
        interval,
        start,
        max_concurrent_runs: ConcurrencyLimit::from(section.max_concurrent_runs),
    })
}

fn validate_runtime(cfg: &RawConfigFile) -> Result<RuntimeSettings> {
    let section = &cfg.runtime;

    if section.worker_pool_size == 0 {
        return Err(config_error(
            "[runtime].worker_pool_size must be >= 1 (got 0)",
        ));
    }

    Ok(RuntimeSettings {
        worker_pool_size: section.worker_pool_size,
        history: section.history,
        history_path: section.history_path.clone(),
    })
}

fn resolve_tasks(cfg: &RawConfigFile) -> Result<Vec<TaskDescriptor>> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [[task]] entry",
        ));
    }

    cfg.task
        .iter()
        .map(|task| resolve_task(task, &cfg.default))
        .collect()
}

fn resolve_task(task: &TaskConfig, defaults: &DefaultSection) -> Result<TaskDescriptor> {
    if task.name.trim().is_empty() {
        return Err(config_error("every [[task]] needs a non-empty `name`"));
    }
    if task.action.trim().is_empty() {
        return Err(config_error(format!(
            "task '{}' has an empty `action`",
            task.name
        )));
    }

    let max_retries = task.retries.or(defaults.retries).unwrap_or(DEFAULT_RETRIES);

    let retry_delay = match task.retry_delay.as_deref().or(defaults.retry_delay.as_deref()) {
        Some(raw) => parse_task_duration(&task.name, "retry_delay", raw)?,
        None => DEFAULT_RETRY_DELAY,
    };

    let timeout = match task.timeout.as_deref().or(defaults.timeout.as_deref()) {
        Some(raw) => {
            let limit = parse_task_duration(&task.name, "timeout", raw)?;
            if limit.is_zero() {
                return Err(config_error(format!(
                    "task '{}' has a zero `timeout`",
                    task.name
                )));
            }
            Some(limit)
        }
        None => None,
    };

    Ok(TaskDescriptor {
        name: task.name.clone(),
        action: task.action.clone(),
        depends_on: task.after.clone(),
        max_retries,
        retry_delay,
        timeout,
    })
}

fn parse_task_duration(task: &str, field: &str, raw: &str) -> Result<Duration> {
    parse_duration(raw).map_err(|e| config_error(format!("task '{task}' `{field}`: {e}")))
}

fn config_error(msg: impl Into<String>) -> PipetickError {
    PipetickError::ConfigError(msg.into())
}
