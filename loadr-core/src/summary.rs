use std::collections::BTreeMap;
use std::time::Duration;

use loadr_metrics::{MetricKind, MetricSnapshot, MetricUnit, Registry};

use crate::builtin::CHECKS;
use crate::scheduler::ScenarioReport;
use crate::thresholds::Stat;
use crate::thresholds_eval::{CompiledThreshold, ThresholdOutcome, ThresholdResult, observed_value};

/// Overall verdict of a run, derived from threshold outcomes only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    /// No threshold failed, but at least one had no samples to judge.
    Inconclusive,
}

impl RunStatus {
    pub fn from_thresholds(results: &[ThresholdResult]) -> Self {
        if results
            .iter()
            .any(|r| r.outcome == ThresholdOutcome::Failed)
        {
            Self::Failed
        } else if results
            .iter()
            .any(|r| r.outcome == ThresholdOutcome::Inconclusive)
        {
            Self::Inconclusive
        } else {
            Self::Passed
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// [`crate::RunController::cancel`] was called.
    Cancelled,
    /// The global run deadline passed.
    Timeout,
    ThresholdFailed { metric: String, expression: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::Timeout => f.write_str("run timeout reached"),
            Self::ThresholdFailed { metric, expression } => {
                write!(f, "threshold `{metric}: {expression}` failed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    pub unit: MetricUnit,
    /// Statistic name (`count`, `rate`, `avg`, `p(95)`, ...) to value.
    pub values: BTreeMap<String, f64>,
    /// Trend percentiles come from a histogram rather than exact samples.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub approximate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CheckSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub elapsed_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
    /// Keyed by metric name; tagged threshold selectors get their own entry.
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn thresholds_failed(&self) -> usize {
        self.count_outcome(ThresholdOutcome::Failed)
    }

    pub fn thresholds_inconclusive(&self) -> usize {
        self.count_outcome(ThresholdOutcome::Inconclusive)
    }

    fn count_outcome(&self, outcome: ThresholdOutcome) -> usize {
        self.thresholds
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }
}

fn summarize_snapshot(
    snapshot: &MetricSnapshot,
    trend_stats: &[Stat],
    elapsed: Duration,
) -> (BTreeMap<String, f64>, bool) {
    let mut values = BTreeMap::new();
    let mut approximate = false;
    let secs = elapsed.as_secs_f64();

    match snapshot {
        MetricSnapshot::Counter { sum, .. } => {
            values.insert("count".to_string(), *sum as f64);
            if secs > 0.0 {
                values.insert("rate".to_string(), *sum as f64 / secs);
            }
        }
        MetricSnapshot::Gauge { value, max } => {
            values.insert("value".to_string(), *value);
            values.insert("max".to_string(), *max);
        }
        MetricSnapshot::Rate { total, hits } => {
            if let Some(rate) = snapshot.rate() {
                values.insert("rate".to_string(), rate);
            }
            values.insert("passes".to_string(), *hits as f64);
            values.insert("fails".to_string(), total.saturating_sub(*hits) as f64);
        }
        MetricSnapshot::Trend(t) => {
            values.insert("count".to_string(), t.count() as f64);
            for stat in trend_stats {
                if let Some(v) = observed_value(snapshot, *stat) {
                    values.insert(stat.to_string(), v);
                }
            }
            approximate = !t.is_exact();
        }
    }

    (values, approximate)
}

/// Statistics for every metric with samples, plus one entry per tagged threshold selector.
pub fn summarize_metrics(
    metrics: &Registry,
    thresholds: &[CompiledThreshold],
    trend_stats: &[Stat],
    elapsed: Duration,
) -> BTreeMap<String, MetricSummary> {
    let mut out = BTreeMap::new();

    for (id, def) in metrics.definitions() {
        let Some(snapshot) = metrics.query(id).snapshot() else {
            continue;
        };
        let (values, approximate) = summarize_snapshot(&snapshot, trend_stats, elapsed);
        out.insert(
            def.name.to_string(),
            MetricSummary {
                kind: def.kind,
                unit: def.unit,
                values,
                approximate,
            },
        );
    }

    for t in thresholds.iter().filter(|t| !t.tags.is_empty()) {
        if out.contains_key(&t.selector) {
            continue;
        }
        let Some(def) = metrics.definition(t.metric) else {
            continue;
        };
        let mut query = metrics.query(t.metric);
        for (k, v) in &t.tags {
            query = query.where_tag(k, v);
        }
        let Some(snapshot) = query.snapshot() else {
            continue;
        };
        let (values, approximate) = summarize_snapshot(&snapshot, trend_stats, elapsed);
        out.insert(
            t.selector.clone(),
            MetricSummary {
                kind: def.kind,
                unit: def.unit,
                values,
                approximate,
            },
        );
    }

    out
}

/// Pass/fail counts per check, ordered by group then name.
pub fn summarize_checks(metrics: &Registry) -> Vec<CheckSummary> {
    let (Some((checks, _)), Some(check_key)) = (metrics.lookup(CHECKS), metrics.find_key("check"))
    else {
        return Vec::new();
    };
    let group_key = metrics.find_key("group");

    let grouped = metrics
        .query(checks)
        .where_has(check_key)
        .group_by(std::iter::once(check_key).chain(group_key))
        .snapshot_grouped();

    let mut out: Vec<CheckSummary> = grouped
        .into_iter()
        .filter_map(|(tags, snapshot)| {
            let MetricSnapshot::Rate { total, hits } = snapshot else {
                return None;
            };
            let name = tags.get(check_key).and_then(|v| metrics.key_str(v))?;
            let group = group_key
                .and_then(|k| tags.get(k))
                .and_then(|v| metrics.key_str(v))
                .map(|g| g.to_string());
            Some(CheckSummary {
                group,
                name: name.to_string(),
                passes: hits,
                fails: total.saturating_sub(hits),
            })
        })
        .collect();

    out.sort_by(|a, b| (&a.group, &a.name).cmp(&(&b.group, &b.name)));
    out
}
