use std::sync::Arc;
use std::time::Duration;

use crate::controller::RunState;
use crate::scheduler::SchedulerEvent;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPhase {
    /// Waiting for its start offset.
    Pending,
    Running,
    /// Window closed; in-flight iterations are finishing.
    Stopping,
    Finished,
    Skipped,
}

impl ScenarioPhase {
    /// No new iterations will start.
    pub fn is_winding_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Finished | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioProgress {
    pub name: String,
    pub phase: ScenarioPhase,
    pub vus: u64,
    pub running_workers: u64,
    pub iterations: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressUpdate {
    /// 1-based tick counter.
    pub tick: u64,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub state: RunState,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub active_vus: u64,
    pub scenarios: Vec<ScenarioProgress>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

mod duration_ms {
    pub(super) fn serialize<S: serde::Serializer>(
        d: &std::time::Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Per-scenario phase bookkeeping fed by scheduler events.
#[derive(Debug, Clone)]
pub(crate) struct ScenarioTracker {
    scenarios: Vec<ScenarioProgress>,
}

impl ScenarioTracker {
    pub(crate) fn new<'a>(scenarios: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        Self {
            scenarios: scenarios
                .into_iter()
                .map(|(name, vus)| ScenarioProgress {
                    name: name.to_string(),
                    phase: ScenarioPhase::Pending,
                    vus,
                    running_workers: 0,
                    iterations: 0,
                })
                .collect(),
        }
    }

    fn find(&mut self, name: &str) -> Option<&mut ScenarioProgress> {
        self.scenarios.iter_mut().find(|s| s.name == name)
    }

    pub(crate) fn apply(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::ScenarioStarted { scenario } => {
                if let Some(s) = self.find(scenario) {
                    s.phase = ScenarioPhase::Running;
                }
            }
            SchedulerEvent::ScenarioSkipped { scenario } => {
                if let Some(s) = self.find(scenario) {
                    s.phase = ScenarioPhase::Skipped;
                }
            }
            SchedulerEvent::WorkerStarted { scenario, .. } => {
                if let Some(s) = self.find(scenario) {
                    s.running_workers += 1;
                }
            }
            SchedulerEvent::ScenarioStopping { scenario } => {
                if let Some(s) = self.find(scenario) {
                    s.phase = ScenarioPhase::Stopping;
                }
            }
            SchedulerEvent::WorkerStopped {
                scenario,
                iterations,
                ..
            } => {
                if let Some(s) = self.find(scenario) {
                    s.running_workers = s.running_workers.saturating_sub(1);
                    s.iterations += iterations;
                }
            }
            SchedulerEvent::ScenarioFinished { scenario } => {
                if let Some(s) = self.find(scenario) {
                    s.phase = ScenarioPhase::Finished;
                    s.running_workers = 0;
                }
            }
        }
    }

    /// Every scenario has passed the end of its window (or will never start).
    pub(crate) fn all_winding_down(&self) -> bool {
        self.scenarios.iter().all(|s| s.phase.is_winding_down())
    }

    pub(crate) fn snapshot(&self) -> Vec<ScenarioProgress> {
        self.scenarios.clone()
    }
}
