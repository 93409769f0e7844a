// src/engine/admission.rs

use tracing::{debug, warn};

use crate::types::ConcurrencyLimit;

/// Verdict for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Start a new run.
    Admit,
    /// Drop the trigger: `active` runs are already in flight.
    Drop { active: usize },
}

/// Decides whether a trigger may start a new run.
///
/// Semantics:
/// - `Unbounded`: every trigger starts a run, so runs may overlap freely.
/// - `AtMost(n)`: while `n` runs are active, further triggers are dropped and
///   logged. Nothing is remembered for later: the next natural tick is the
///   next chance to run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionPolicy {
    limit: ConcurrencyLimit,
}

impl AdmissionPolicy {
    pub fn new(limit: ConcurrencyLimit) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> ConcurrencyLimit {
        self.limit
    }

    pub fn check(&self, active: usize) -> Admission {
        match self.limit {
            ConcurrencyLimit::Unbounded => {
                debug!(active, "admitting run (no concurrency limit)");
                Admission::Admit
            }
            ConcurrencyLimit::AtMost(max) if active < max => {
                debug!(active, max, "admitting run");
                Admission::Admit
            }
            ConcurrencyLimit::AtMost(max) => {
                warn!(
                    active,
                    max,
                    "max_concurrent_runs reached; dropping trigger"
                );
                Admission::Drop { active }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_always_admits() {
        let policy = AdmissionPolicy::default();
        assert_eq!(policy.check(0), Admission::Admit);
        assert_eq!(policy.check(1_000), Admission::Admit);
    }

    #[test]
    fn single_run_limit_drops_while_active() {
        let policy = AdmissionPolicy::new(ConcurrencyLimit::AtMost(1));
        assert_eq!(policy.check(0), Admission::Admit);
        assert_eq!(policy.check(1), Admission::Drop { active: 1 });
    }

    #[test]
    fn limit_of_two_admits_second_run() {
        let policy = AdmissionPolicy::new(ConcurrencyLimit::AtMost(2));
        assert_eq!(policy.check(1), Admission::Admit);
        assert_eq!(policy.check(2), Admission::Drop { active: 2 });
    }
}
