use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::config::ScenarioConfig;
use crate::context::{RunEnv, VuIdentity};
use crate::exec::{Exec, ExecRegistry};
use crate::signal::StopSignal;
use crate::vu::{Worker, WorkerReport};

/// Worker and scenario lifecycle notifications, in the order they happen per scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    ScenarioStarted {
        scenario: Arc<str>,
    },
    /// The run was cancelled before the scenario's start offset.
    ScenarioSkipped {
        scenario: Arc<str>,
    },
    WorkerStarted {
        scenario: Arc<str>,
        vu_id: u64,
    },
    /// The scenario's window closed; workers finish their in-flight iteration.
    ScenarioStopping {
        scenario: Arc<str>,
    },
    WorkerStopped {
        scenario: Arc<str>,
        vu_id: u64,
        iterations: u64,
        /// Aborted after the graceful stop period, or panicked.
        interrupted: bool,
    },
    ScenarioFinished {
        scenario: Arc<str>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub skipped: bool,
    pub workers: u64,
    pub iterations: u64,
    pub failed_iterations: u64,
    /// Workers aborted after the graceful stop period.
    pub interrupted: u64,
    pub panicked: u64,
}

impl ScenarioReport {
    fn absorb(
        &mut self,
        joined: Result<(tokio::task::Id, WorkerReport), JoinError>,
        vu_ids: &HashMap<tokio::task::Id, u64>,
        events: &mpsc::UnboundedSender<SchedulerEvent>,
        scenario: &Arc<str>,
    ) {
        let err = match joined {
            Ok((_, report)) => {
                self.iterations += report.iterations;
                self.failed_iterations += report.failed;
                return;
            }
            Err(err) => err,
        };

        let vu_id = vu_ids.get(&err.id()).copied().unwrap_or_default();
        if err.is_panic() {
            tracing::error!(scenario = %scenario, vu = vu_id, "worker panicked");
            self.panicked += 1;
        } else {
            self.interrupted += 1;
        }
        let _ = events.send(SchedulerEvent::WorkerStopped {
            scenario: scenario.clone(),
            vu_id,
            iterations: 0,
            interrupted: true,
        });
    }
}

/// Runs every scenario of a plan on its own timeline.
pub(crate) struct Scheduler {
    scenarios: Vec<ScenarioConfig>,
    execs: ExecRegistry,
    env: Arc<RunEnv>,
}

impl Scheduler {
    pub(crate) fn new(scenarios: Vec<ScenarioConfig>, execs: ExecRegistry, env: Arc<RunEnv>) -> Self {
        Self {
            scenarios,
            execs,
            env,
        }
    }

    /// Drives all scenarios to completion. Tripping `cancel` stops running scenarios (after their
    /// graceful stop) and skips those that have not started yet.
    pub(crate) async fn run(
        self,
        cancel: Arc<StopSignal>,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Vec<ScenarioReport> {
        let mut tasks = JoinSet::new();
        let mut next_vu_id: u64 = 1;

        for (idx, scenario) in self.scenarios.into_iter().enumerate() {
            let Some(exec) = self.execs.get(&scenario.exec).cloned() else {
                // Scenarios are validated against the exec registry before the run starts.
                tracing::error!(scenario = %scenario.name, exec = %scenario.exec, "unknown exec");
                continue;
            };

            let first_vu_id = next_vu_id;
            next_vu_id = next_vu_id.saturating_add(scenario.vus());

            let run = ScenarioRun {
                scenario,
                exec,
                env: self.env.clone(),
                first_vu_id,
                cancel: cancel.clone(),
                events: events.clone(),
            };
            tasks.spawn(async move { (idx, run.run().await) });
        }
        drop(events);

        let mut reports: Vec<(usize, ScenarioReport)> = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => tracing::error!(error = %err, "scenario task failed"),
            }
        }
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, r)| r).collect()
    }
}

struct ScenarioRun {
    scenario: ScenarioConfig,
    exec: Exec,
    env: Arc<RunEnv>,
    first_vu_id: u64,
    cancel: Arc<StopSignal>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl ScenarioRun {
    async fn run(self) -> ScenarioReport {
        let name = self.scenario.name.clone();
        let mut report = ScenarioReport {
            name: name.to_string(),
            ..ScenarioReport::default()
        };

        if !self.wait_for_start().await {
            tracing::warn!(scenario = %name, "run cancelled before scenario start; skipping");
            report.skipped = true;
            let _ = self
                .events
                .send(SchedulerEvent::ScenarioSkipped { scenario: name });
            return report;
        }

        let vus = self.scenario.vus();
        tracing::info!(
            scenario = %name,
            executor = %self.scenario.executor.kind(),
            vus,
            window = %humantime::format_duration(self.scenario.window()),
            "scenario started"
        );
        let _ = self.events.send(SchedulerEvent::ScenarioStarted {
            scenario: name.clone(),
        });

        let stop = Arc::new(StopSignal::new());
        let mut workers = JoinSet::new();
        let mut vu_ids: HashMap<tokio::task::Id, u64> = HashMap::new();
        for i in 0..vus {
            let vu_id = self.first_vu_id + i;
            let worker = Worker {
                vu: Arc::new(VuIdentity {
                    vu_id,
                    scenario: name.clone(),
                    scenario_tags: self.scenario.tags.clone(),
                    env: self.env.clone(),
                }),
                exec: self.exec.clone(),
                iterations: self.scenario.iterations_per_vu(),
                stop: stop.clone(),
                events: self.events.clone(),
            };
            let handle = workers.spawn(worker.run());
            vu_ids.insert(handle.id(), vu_id);
        }
        report.workers = vus;

        // Active phase: until the window closes, the run is cancelled, or every worker is done.
        let window = tokio::time::sleep(self.scenario.window());
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                _ = self.cancel.wait() => break,
                joined = workers.join_next_with_id() => match joined {
                    Some(joined) => report.absorb(joined, &vu_ids, &self.events, &name),
                    None => break,
                },
            }
        }

        stop.stop();
        let _ = self.events.send(SchedulerEvent::ScenarioStopping {
            scenario: name.clone(),
        });

        // Graceful phase: in-flight iterations may finish; the rest is aborted.
        let grace = tokio::time::sleep(self.scenario.graceful_stop);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    if !workers.is_empty() {
                        tracing::warn!(
                            scenario = %name,
                            workers = workers.len(),
                            "graceful stop elapsed; interrupting workers"
                        );
                        workers.abort_all();
                    }
                    break;
                }
                joined = workers.join_next_with_id() => match joined {
                    Some(joined) => report.absorb(joined, &vu_ids, &self.events, &name),
                    None => break,
                },
            }
        }
        while let Some(joined) = workers.join_next_with_id().await {
            report.absorb(joined, &vu_ids, &self.events, &name);
        }

        if report.interrupted > 0 {
            let env = &self.env;
            let mut tags: Vec<(&str, &str)> = self
                .scenario
                .tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tags.push(("scenario", name.as_ref()));
            let tags = env.metrics.resolve_tags(&tags);
            if let Some(c) = env.metrics.counter(env.builtin.iterations_interrupted, tags) {
                c.add(report.interrupted);
            }
        }

        tracing::info!(
            scenario = %name,
            iterations = report.iterations,
            failed = report.failed_iterations,
            interrupted = report.interrupted,
            "scenario finished"
        );
        let _ = self
            .events
            .send(SchedulerEvent::ScenarioFinished { scenario: name });
        report
    }

    /// Sleeps until the start offset. Returns `false` when the run is cancelled first.
    async fn wait_for_start(&self) -> bool {
        if self.cancel.is_stopped() {
            return false;
        }
        if self.scenario.start_time.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.scenario.start_time) => !self.cancel.is_stopped(),
            _ = self.cancel.wait() => false,
        }
    }
}
