use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{DEFAULT_MAX_TREND_SAMPLES, MetricKind, MetricUnit};

use crate::error::{Error, Result};
use crate::exec::ExecRegistry;
use crate::thresholds::{Stat, ThresholdSet};

pub const DEFAULT_EXEC: &str = "default";
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on workers per scenario.
pub(crate) const MAX_VUS: u64 = 1_000_000;

/// Scenario executor kind (the string form used by scripts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "per-vu-iterations")]
    PerVuIterations,
}

/// Scenario as written in a script, before validation.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,
    /// Defaults to `constant-vus`.
    pub executor: Option<String>,
    /// Defaults to [`DEFAULT_EXEC`].
    pub exec: Option<String>,
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub max_duration: Option<Duration>,
    pub start_time: Option<Duration>,
    pub graceful_stop: Option<Duration>,
    /// Extra tags attached to every sample of the scenario.
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioExecutor {
    /// `vus` workers loop until `duration` elapses.
    ConstantVus { vus: u64, duration: Duration },

    /// Each of `vus` workers runs `iterations` iterations, bounded by `max_duration`.
    PerVuIterations {
        vus: u64,
        iterations: u64,
        max_duration: Duration,
    },
}

impl ScenarioExecutor {
    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::ConstantVus { .. } => ScenarioExecutorKind::ConstantVus,
            Self::PerVuIterations { .. } => ScenarioExecutorKind::PerVuIterations,
        }
    }
}

/// Validated, immutable scenario handed to the scheduler.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: Arc<str>,
    pub exec: String,
    pub executor: ScenarioExecutor,
    pub start_time: Duration,
    pub graceful_stop: Duration,
    pub tags: Arc<[(String, String)]>,
}

impl ScenarioConfig {
    pub fn vus(&self) -> u64 {
        match self.executor {
            ScenarioExecutor::ConstantVus { vus, .. }
            | ScenarioExecutor::PerVuIterations { vus, .. } => vus,
        }
    }

    /// How long workers may start new iterations once the scenario has started.
    pub fn window(&self) -> Duration {
        match self.executor {
            ScenarioExecutor::ConstantVus { duration, .. } => duration,
            ScenarioExecutor::PerVuIterations { max_duration, .. } => max_duration,
        }
    }

    pub fn iterations_per_vu(&self) -> Option<u64> {
        match self.executor {
            ScenarioExecutor::ConstantVus { .. } => None,
            ScenarioExecutor::PerVuIterations { iterations, .. } => Some(iterations),
        }
    }
}

/// A custom metric declared up front, so thresholds can reference it before it receives samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
    pub unit: MetricUnit,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Exact samples kept per trend series before it switches to a histogram.
    pub max_trend_samples: usize,
    pub request_timeout: Duration,
    /// How often `abort_on_fail` thresholds are checked while the run is in progress.
    pub threshold_interval: Duration,
    /// Global deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Statistics reported for trend metrics in the summary.
    pub summary_trend_stats: Vec<Stat>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_trend_samples: DEFAULT_MAX_TREND_SAMPLES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            timeout: None,
            summary_trend_stats: default_summary_trend_stats(),
        }
    }
}

pub fn default_summary_trend_stats() -> Vec<Stat> {
    vec![
        Stat::Avg,
        Stat::Min,
        Stat::Med,
        Stat::Max,
        Stat::P(90.0),
        Stat::P(95.0),
    ]
}

/// Everything a run needs, fixed before it starts.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub scenarios: Vec<ScenarioOptions>,
    pub execs: ExecRegistry,
    pub metrics: Vec<MetricDecl>,
    pub thresholds: Vec<ThresholdSet>,
    pub settings: RunSettings,
}

pub fn resolve_scenarios(
    opts: &[ScenarioOptions],
    execs: &ExecRegistry,
) -> Result<Vec<ScenarioConfig>> {
    if opts.is_empty() {
        return Err(Error::NoScenarios);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(opts.len());
    let mut out = Vec::with_capacity(opts.len());

    for s in opts {
        if !seen.insert(s.name.as_str()) {
            return Err(Error::DuplicateScenario(s.name.clone()));
        }

        let executor_name = s.executor.as_deref().unwrap_or("constant-vus");
        let kind: ScenarioExecutorKind =
            executor_name
                .parse()
                .map_err(|_| Error::InvalidExecutor {
                    scenario: s.name.clone(),
                    executor: executor_name.to_string(),
                })?;

        let unsupported = |field: &'static str| Error::UnsupportedField {
            scenario: s.name.clone(),
            executor: kind.to_string(),
            field,
        };

        let vus = s.vus.unwrap_or(1);
        if vus == 0 || vus > MAX_VUS {
            return Err(Error::InvalidVus {
                scenario: s.name.clone(),
            });
        }

        let executor = match kind {
            ScenarioExecutorKind::ConstantVus => {
                if s.iterations.is_some() {
                    return Err(unsupported("iterations"));
                }
                if s.max_duration.is_some() {
                    return Err(unsupported("maxDuration"));
                }
                let duration = s.duration.filter(|d| !d.is_zero()).ok_or_else(|| {
                    Error::InvalidDuration {
                        scenario: s.name.clone(),
                    }
                })?;
                ScenarioExecutor::ConstantVus { vus, duration }
            }
            ScenarioExecutorKind::PerVuIterations => {
                if s.duration.is_some() {
                    return Err(unsupported("duration"));
                }
                let iterations = s.iterations.unwrap_or(1);
                if iterations == 0 {
                    return Err(Error::InvalidIterations {
                        scenario: s.name.clone(),
                    });
                }
                let max_duration = s.max_duration.unwrap_or(DEFAULT_MAX_DURATION);
                if max_duration.is_zero() {
                    return Err(Error::InvalidDuration {
                        scenario: s.name.clone(),
                    });
                }
                ScenarioExecutor::PerVuIterations {
                    vus,
                    iterations,
                    max_duration,
                }
            }
        };

        let exec = s.exec.clone().unwrap_or_else(|| DEFAULT_EXEC.to_string());
        if !execs.contains(&exec) {
            return Err(Error::UnknownExec {
                scenario: s.name.clone(),
                exec,
            });
        }

        out.push(ScenarioConfig {
            name: Arc::from(s.name.as_str()),
            exec,
            executor,
            start_time: s.start_time.unwrap_or_default(),
            graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            tags: Arc::from(s.tags.clone()),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Exec;

    fn execs() -> ExecRegistry {
        let mut execs = ExecRegistry::default();
        execs.insert(DEFAULT_EXEC, Exec::new(|_ctx| async { Ok(()) }));
        execs.insert("browse", Exec::new(|_ctx| async { Ok(()) }));
        execs
    }

    fn constant(name: &str, vus: u64, secs: u64) -> ScenarioOptions {
        ScenarioOptions {
            name: name.to_string(),
            vus: Some(vus),
            duration: Some(Duration::from_secs(secs)),
            ..ScenarioOptions::default()
        }
    }

    #[test]
    fn constant_vus_defaults() {
        let out = resolve_scenarios(&[constant("a", 5, 10)], &execs())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out.len(), 1);
        let s = &out[0];
        assert_eq!(s.vus(), 5);
        assert_eq!(s.window(), Duration::from_secs(10));
        assert_eq!(s.exec, DEFAULT_EXEC);
        assert_eq!(s.start_time, Duration::ZERO);
        assert_eq!(s.graceful_stop, DEFAULT_GRACEFUL_STOP);
        assert_eq!(s.iterations_per_vu(), None);
    }

    #[test]
    fn per_vu_iterations_defaults_max_duration() {
        let opts = ScenarioOptions {
            name: "once".to_string(),
            executor: Some("per-vu-iterations".to_string()),
            exec: Some("browse".to_string()),
            vus: Some(2),
            iterations: Some(3),
            ..ScenarioOptions::default()
        };
        let out = resolve_scenarios(&[opts], &execs()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            out[0].executor,
            ScenarioExecutor::PerVuIterations {
                vus: 2,
                iterations: 3,
                max_duration: DEFAULT_MAX_DURATION,
            }
        );
    }

    #[test]
    fn rejects_invalid_scenarios() {
        let execs = execs();

        assert!(matches!(
            resolve_scenarios(&[], &execs),
            Err(Error::NoScenarios)
        ));
        assert!(matches!(
            resolve_scenarios(&[constant("a", 0, 10)], &execs),
            Err(Error::InvalidVus { .. })
        ));
        assert!(matches!(
            resolve_scenarios(&[constant("a", u64::MAX, 10)], &execs),
            Err(Error::InvalidVus { .. })
        ));
        assert!(resolve_scenarios(&[constant("a", MAX_VUS, 10)], &execs).is_ok());
        assert!(matches!(
            resolve_scenarios(&[constant("a", 1, 0)], &execs),
            Err(Error::InvalidDuration { .. })
        ));
        assert!(matches!(
            resolve_scenarios(&[constant("a", 1, 1), constant("a", 1, 1)], &execs),
            Err(Error::DuplicateScenario(_))
        ));

        let mut bad_exec = constant("a", 1, 1);
        bad_exec.exec = Some("missing".to_string());
        assert!(matches!(
            resolve_scenarios(&[bad_exec], &execs),
            Err(Error::UnknownExec { .. })
        ));

        let mut bad_kind = constant("a", 1, 1);
        bad_kind.executor = Some("ramping-arrival-rate".to_string());
        assert!(matches!(
            resolve_scenarios(&[bad_kind], &execs),
            Err(Error::InvalidExecutor { .. })
        ));

        let mut mixed = constant("a", 1, 1);
        mixed.iterations = Some(3);
        assert!(matches!(
            resolve_scenarios(&[mixed], &execs),
            Err(Error::UnsupportedField {
                field: "iterations",
                ..
            })
        ));
    }
}
