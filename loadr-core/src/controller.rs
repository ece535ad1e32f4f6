use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{MetricSnapshot, Registry, TagSet};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::builtin::BuiltinMetrics;
use crate::config::{RunPlan, RunSettings, ScenarioConfig, resolve_scenarios};
use crate::context::RunEnv;
use crate::error::{Error, Result};
use crate::exec::ExecRegistry;
use crate::progress::{ProgressFn, ProgressUpdate, ScenarioTracker};
use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::signal::StopSignal;
use crate::summary::{AbortReason, RunStatus, RunSummary, summarize_checks, summarize_metrics};
use crate::thresholds_eval::{
    CompiledThreshold, ThresholdOutcome, compile_thresholds, evaluate_threshold,
    evaluate_thresholds,
};
use crate::transport::Transport;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const MAX_THRESHOLD_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// No new iterations start; in-flight ones are finishing.
    Draining,
    /// Terminal.
    Finished,
}

/// Owns the metric registry and drives one run of a [`RunPlan`].
///
/// Configuration is validated in [`RunController::new`], so a constructed controller only fails at
/// run time if the scheduler task itself dies.
pub struct RunController {
    scenarios: Vec<ScenarioConfig>,
    execs: ExecRegistry,
    thresholds: Vec<CompiledThreshold>,
    settings: RunSettings,
    metrics: Arc<Registry>,
    builtin: BuiltinMetrics,
    transport: Arc<dyn Transport>,
    state: watch::Sender<RunState>,
    cancel: Arc<StopSignal>,
    abort_reason: Mutex<Option<AbortReason>>,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("scenarios", &self.scenarios)
            .field("thresholds", &self.thresholds.len())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RunController {
    pub fn new(plan: RunPlan, transport: Arc<dyn Transport>) -> Result<Self> {
        let RunPlan {
            scenarios,
            execs,
            metrics: decls,
            thresholds,
            settings,
        } = plan;

        let scenarios = resolve_scenarios(&scenarios, &execs)?;

        let metrics = Arc::new(Registry::new(settings.max_trend_samples));
        let builtin = BuiltinMetrics::register(&metrics)?;
        for decl in &decls {
            metrics.register(&decl.name, decl.kind, decl.unit)?;
        }
        let thresholds = compile_thresholds(&metrics, &thresholds)?;

        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            scenarios,
            execs,
            thresholds,
            settings,
            metrics,
            builtin,
            transport,
            state,
            cancel: Arc::new(StopSignal::new()),
            abort_reason: Mutex::new(None),
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.metrics
    }

    pub fn scenarios(&self) -> &[ScenarioConfig] {
        &self.scenarios
    }

    /// Stops every running scenario (after its graceful stop) and skips the ones not yet started.
    pub fn cancel(&self) {
        self.abort(AbortReason::Cancelled);
    }

    fn abort(&self, reason: AbortReason) {
        {
            let mut slot = self.abort_reason.lock();
            if slot.is_none() {
                tracing::warn!(reason = %reason, "aborting run");
                *slot = Some(reason);
            }
        }
        self.cancel.stop();
    }

    fn enter_draining(&self) {
        let changed = self.state.send_if_modified(|s| {
            if *s == RunState::Running {
                *s = RunState::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("run draining");
        }
    }

    /// Runs every scenario to completion, evaluates thresholds and returns the summary.
    ///
    /// A controller runs at most once; later calls return [`Error::AlreadyStarted`].
    pub async fn run(&self) -> Result<RunSummary> {
        let began = self.state.send_if_modified(|s| {
            if *s == RunState::Idle {
                *s = RunState::Running;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(Error::AlreadyStarted);
        }

        let started = Instant::now();
        let env = Arc::new(RunEnv {
            metrics: self.metrics.clone(),
            builtin: self.builtin,
            transport: self.transport.clone(),
            request_timeout: self.settings.request_timeout,
            started,
        });

        let vus_max: u64 = self.scenarios.iter().map(ScenarioConfig::vus).sum();
        if let Some(g) = self.metrics.gauge(self.builtin.vus_max, TagSet::default()) {
            g.set(vus_max as f64);
        }

        tracing::info!(
            scenarios = self.scenarios.len(),
            vus_max,
            thresholds = self.thresholds.len(),
            "run started"
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(self.scenarios.clone(), self.execs.clone(), env);
        let mut scheduler = tokio::spawn(scheduler.run(self.cancel.clone(), events_tx));

        let mut tracker =
            ScenarioTracker::new(self.scenarios.iter().map(|s| (s.name.as_ref(), s.vus())));

        // A deadline past the end of the clock is no deadline.
        let deadline = self.settings.timeout.and_then(|t| started.checked_add(t));
        let deadline_sleep = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        let period = self
            .settings
            .threshold_interval
            .clamp(Duration::from_millis(1), MAX_THRESHOLD_INTERVAL);
        let mut abort_tick = tokio::time::interval_at(started + period, period);
        abort_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let watch_aborts = self.thresholds.iter().any(|t| t.abort_on_fail);

        let mut progress_tick =
            tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;

        let mut events_open = true;
        let mut deadline_hit = false;
        let mut cancel_seen = false;

        let joined = loop {
            tokio::select! {
                joined = &mut scheduler => break joined,
                event = events_rx.recv(), if events_open => match event {
                    Some(event) => {
                        tracker.apply(&event);
                        if matches!(event, SchedulerEvent::ScenarioStopping { .. } | SchedulerEvent::ScenarioSkipped { .. })
                            && tracker.all_winding_down()
                        {
                            self.enter_draining();
                        }
                    }
                    None => events_open = false,
                },
                _ = &mut deadline_sleep, if !deadline_hit => {
                    deadline_hit = true;
                    self.abort(AbortReason::Timeout);
                }
                _ = self.cancel.wait(), if !cancel_seen => {
                    cancel_seen = true;
                    self.enter_draining();
                }
                _ = abort_tick.tick(), if watch_aborts && !cancel_seen => {
                    if let Some(reason) = self.failed_abort_threshold(started.elapsed()) {
                        self.abort(reason);
                    }
                }
                _ = progress_tick.tick(), if self.progress.is_some() => {
                    tick += 1;
                    self.emit_progress(tick, started.elapsed(), &tracker);
                }
            }
        };

        let reports = match joined {
            Ok(reports) => reports,
            Err(err) => {
                tracing::error!(error = %err, "scheduler task failed");
                self.state.send_replace(RunState::Finished);
                return Err(err.into());
            }
        };

        self.enter_draining();
        while let Ok(event) = events_rx.try_recv() {
            tracker.apply(&event);
        }

        let elapsed = started.elapsed();
        let thresholds = evaluate_thresholds(&self.metrics, &self.thresholds);
        let abort_reason = self.abort_reason.lock().clone();

        let summary = RunSummary {
            status: RunStatus::from_thresholds(&thresholds),
            aborted: abort_reason.is_some(),
            abort_reason,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            scenarios: reports,
            metrics: summarize_metrics(
                &self.metrics,
                &self.thresholds,
                &self.settings.summary_trend_stats,
                elapsed,
            ),
            checks: summarize_checks(&self.metrics),
            thresholds,
        };

        if let Some(progress) = &self.progress {
            progress(self.progress_update(tick + 1, elapsed, RunState::Finished, &tracker));
        }
        self.state.send_replace(RunState::Finished);

        tracing::info!(
            status = %summary.status,
            aborted = summary.aborted,
            elapsed = %humantime::format_duration(Duration::from_millis(summary.elapsed_ms)),
            "run finished"
        );
        Ok(summary)
    }

    /// First `abort_on_fail` threshold failing once its delay has passed.
    fn failed_abort_threshold(&self, elapsed: Duration) -> Option<AbortReason> {
        self.thresholds
            .iter()
            .filter(|t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
            .find_map(|t| {
                let result = evaluate_threshold(&self.metrics, t);
                (result.outcome == ThresholdOutcome::Failed).then(|| {
                    AbortReason::ThresholdFailed {
                        metric: result.metric,
                        expression: result.expression,
                    }
                })
            })
    }

    fn emit_progress(&self, tick: u64, elapsed: Duration, tracker: &ScenarioTracker) {
        if let Some(progress) = &self.progress {
            progress(self.progress_update(tick, elapsed, self.state(), tracker));
        }
    }

    fn progress_update(
        &self,
        tick: u64,
        elapsed: Duration,
        state: RunState,
        tracker: &ScenarioTracker,
    ) -> ProgressUpdate {
        let b = &self.builtin;
        let counter = |id| match self.metrics.query(id).snapshot() {
            Some(MetricSnapshot::Counter { sum, .. }) => sum,
            _ => 0,
        };
        let failed_requests = match self.metrics.query(b.http_req_failed).snapshot() {
            Some(MetricSnapshot::Rate { hits, .. }) => hits,
            _ => 0,
        };
        let active_vus = match self.metrics.query(b.vus).snapshot() {
            Some(MetricSnapshot::Gauge { value, .. }) => value.max(0.0) as u64,
            _ => 0,
        };

        ProgressUpdate {
            tick,
            elapsed,
            state,
            requests_total: counter(b.http_reqs),
            failed_requests_total: failed_requests,
            iterations_total: counter(b.iterations),
            active_vus,
            scenarios: tracker.snapshot(),
        }
    }
}
