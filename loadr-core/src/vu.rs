use std::sync::Arc;

use loadr_metrics::{Gauge, Sample, SampleValue, TagSet};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::builtin::duration_ms;
use crate::context::{IterationContext, VuIdentity};
use crate::exec::Exec;
use crate::scheduler::SchedulerEvent;
use crate::signal::StopSignal;

/// What a worker did before it exited on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub iterations: u64,
    pub failed: u64,
}

/// Keeps the `vus` gauge in step with running workers, including aborted and panicked ones.
struct ActiveVuGuard {
    gauge: Option<Gauge>,
}

impl ActiveVuGuard {
    fn enter(vu: &VuIdentity) -> Self {
        let env = &vu.env;
        let gauge = env.metrics.gauge(env.builtin.vus, TagSet::default());
        if let Some(g) = &gauge {
            g.add(1.0);
        }
        Self { gauge }
    }
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        if let Some(g) = &self.gauge {
            g.add(-1.0);
        }
    }
}

pub(crate) struct Worker {
    pub(crate) vu: Arc<VuIdentity>,
    pub(crate) exec: Exec,
    /// Per-VU iteration budget; `None` loops until stopped.
    pub(crate) iterations: Option<u64>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl Worker {
    pub(crate) async fn run(self) -> WorkerReport {
        let _active = ActiveVuGuard::enter(&self.vu);
        let scenario = self.vu.scenario.clone();
        let vu_id = self.vu.vu_id;

        let _ = self.events.send(SchedulerEvent::WorkerStarted {
            scenario: scenario.clone(),
            vu_id,
        });
        tracing::debug!(scenario = %scenario, vu = vu_id, "worker started");

        let mut report = WorkerReport::default();
        let mut iteration: u64 = 0;
        loop {
            if self.stop.is_stopped() {
                break;
            }
            if self.iterations.is_some_and(|limit| iteration >= limit) {
                break;
            }

            if self.run_iteration(iteration).await {
                report.iterations += 1;
            } else {
                report.failed += 1;
            }
            iteration += 1;

            let think = self.exec.think_time;
            if think.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(think) => {}
                    _ = self.stop.wait() => break,
                }
            }
        }

        tracing::debug!(
            scenario = %scenario,
            vu = vu_id,
            iterations = report.iterations,
            failed = report.failed,
            "worker stopped"
        );
        let _ = self.events.send(SchedulerEvent::WorkerStopped {
            scenario,
            vu_id,
            iterations: report.iterations,
            interrupted: false,
        });
        report
    }

    /// Runs one iteration and commits its samples. Returns whether the iteration succeeded.
    async fn run_iteration(&self, iteration: u64) -> bool {
        let ctx = IterationContext::new(self.vu.clone(), iteration);
        let started = Instant::now();
        let result = (self.exec.func)(ctx.clone()).await;
        let elapsed = started.elapsed();
        let buffer = ctx.take_buffer();

        let env = &self.vu.env;
        let tags = self.vu.tags(&[]);

        let (batch, ok) = match result {
            Ok(()) => {
                let mut batch = buffer.samples;
                batch.extend(buffer.always);
                batch.push(self.vu.sample(
                    env.builtin.iterations,
                    tags.clone(),
                    SampleValue::Counter(1),
                ));
                batch.push(self.vu.sample(
                    env.builtin.iteration_duration,
                    tags,
                    SampleValue::Trend(duration_ms(elapsed)),
                ));
                (batch, true)
            }
            Err(err) => {
                tracing::warn!(
                    scenario = %self.vu.scenario,
                    vu = self.vu.vu_id,
                    iteration,
                    error = %err,
                    "iteration failed"
                );
                let mut batch = buffer.always;
                batch.push(self.vu.sample(
                    env.builtin.iterations_failed,
                    tags,
                    SampleValue::Counter(1),
                ));
                (batch, false)
            }
        };

        commit(&self.vu, &batch);
        ok
    }
}

fn commit(vu: &VuIdentity, batch: &[Sample]) {
    if let Err(err) = vu.env.metrics.commit(batch) {
        tracing::warn!(
            scenario = %vu.scenario,
            vu = vu.vu_id,
            error = %err,
            "dropping iteration samples"
        );
    }
}
