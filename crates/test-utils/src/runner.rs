use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use pipetick::dag::{RunId, TaskName};
use pipetick::exec::{ActionReport, ActionRunner, RunContext};
use tokio::time::Instant;

/// What one attempt of a task does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(Duration),
    Fail(Duration),
    /// Return `Err` from the runner (a collaborator crash).
    Crash,
}

impl Step {
    pub fn ok() -> Self {
        Step::Succeed(Duration::ZERO)
    }

    pub fn fail() -> Self {
        Step::Fail(Duration::ZERO)
    }
}

/// One call into the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub run_id: RunId,
    pub task: TaskName,
    pub attempt: u32,
    pub started: Instant,
}

/// Action runner driven by a per-task script.
///
/// Attempt `n` of a task plays the script's `n`th step; once the script is
/// exhausted the last step repeats. Unscripted tasks succeed immediately.
/// Sleeps use Tokio time, so they're instant under `start_paused`.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: HashMap<TaskName, Vec<Step>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, task: &str, steps: Vec<Step>) -> Self {
        self.scripts.insert(task.to_string(), steps);
        self
    }

    /// Every attempt of `task` takes `duration` and succeeds.
    pub fn takes(self, task: &str, duration: Duration) -> Self {
        self.script(task, vec![Step::Succeed(duration)])
    }

    /// Every attempt of `task` fails immediately.
    pub fn always_fails(self, task: &str) -> Self {
        self.script(task, vec![Step::fail()])
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Task names in invocation order.
    pub fn order(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.task.clone())
            .collect()
    }

    pub fn attempts_of(&self, run_id: RunId, task: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.run_id == run_id && i.task == task)
            .count()
    }

    fn step_for(&self, task: &str, attempt: u32) -> Step {
        match self.scripts.get(task) {
            Some(steps) if !steps.is_empty() => {
                let idx = (attempt as usize).saturating_sub(1).min(steps.len() - 1);
                steps[idx].clone()
            }
            _ => Step::ok(),
        }
    }
}

impl ActionRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        _action: &'a str,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionReport>> + Send + 'a>> {
        Box::pin(async move {
            self.invocations.lock().unwrap().push(Invocation {
                run_id: ctx.run_id,
                task: ctx.task.clone(),
                attempt: ctx.attempt,
                started: Instant::now(),
            });

            match self.step_for(&ctx.task, ctx.attempt) {
                Step::Succeed(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ActionReport::ok())
                }
                Step::Fail(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ActionReport::failed(format!(
                        "{} failed on attempt {}",
                        ctx.task, ctx.attempt
                    )))
                }
                Step::Crash => Err(anyhow::anyhow!("runner crashed")),
            }
        })
    }
}
