use std::time::Duration;

use loadr_metrics::{MetricId, MetricKind, MetricSnapshot, Registry};

use crate::thresholds::{
    MetricSelector, Stat, ThresholdError, ThresholdExpr, ThresholdSet, parse_selector,
    parse_threshold_expr,
};

/// A threshold resolved against the metric registry.
#[derive(Debug, Clone)]
pub struct CompiledThreshold {
    pub selector: String,
    pub expression: String,
    pub metric: MetricId,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOutcome {
    Passed,
    Failed,
    /// The selector matched no samples.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub outcome: ThresholdOutcome,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

/// Validates every threshold against the registered metrics. Runs before any worker starts.
pub fn compile_thresholds(
    metrics: &Registry,
    sets: &[ThresholdSet],
) -> Result<Vec<CompiledThreshold>, ThresholdError> {
    let mut out = Vec::new();

    for set in sets {
        let MetricSelector { metric, tags } = parse_selector(&set.selector)?;
        let Some((metric_id, def)) = metrics.lookup(&metric) else {
            return Err(ThresholdError::UnknownMetric {
                selector: set.selector.clone(),
                metric,
            });
        };

        for spec in &set.thresholds {
            let expr = parse_threshold_expr(&spec.expression).map_err(|reason| {
                ThresholdError::InvalidExpression {
                    selector: set.selector.clone(),
                    expression: spec.expression.clone(),
                    reason,
                }
            })?;

            if !expr.stat.supports(def.kind) {
                return Err(ThresholdError::UnsupportedStat {
                    selector: set.selector.clone(),
                    expression: spec.expression.clone(),
                    stat: expr.stat.to_string(),
                    kind: def.kind,
                });
            }

            out.push(CompiledThreshold {
                selector: set.selector.clone(),
                expression: spec.expression.clone(),
                metric: metric_id,
                kind: def.kind,
                tags: tags.clone(),
                expr,
                abort_on_fail: spec.abort_on_fail,
                delay_abort_eval: spec.delay_abort_eval.unwrap_or_default(),
            });
        }
    }

    Ok(out)
}

/// Reads a statistic from an aggregated metric. `None` when the metric cannot produce it.
pub fn observed_value(snapshot: &MetricSnapshot, stat: Stat) -> Option<f64> {
    match (snapshot, stat) {
        (MetricSnapshot::Counter { sum, .. }, Stat::Count) => Some(*sum as f64),

        (MetricSnapshot::Gauge { value, .. }, Stat::Value) => Some(*value),
        (MetricSnapshot::Gauge { max, .. }, Stat::Max) => Some(*max),

        (MetricSnapshot::Rate { .. }, Stat::Rate) => snapshot.rate(),
        (MetricSnapshot::Rate { total, .. }, Stat::Count) => Some(*total as f64),

        (MetricSnapshot::Trend(t), Stat::Avg) => t.avg(),
        (MetricSnapshot::Trend(t), Stat::Min) => t.min(),
        (MetricSnapshot::Trend(t), Stat::Max) => t.max(),
        (MetricSnapshot::Trend(t), Stat::Med) => t.med(),
        (MetricSnapshot::Trend(t), Stat::Count) => Some(t.count() as f64),
        (MetricSnapshot::Trend(t), Stat::P(p)) => t.percentile(p),

        _ => None,
    }
}

pub fn evaluate_threshold(metrics: &Registry, threshold: &CompiledThreshold) -> ThresholdResult {
    let mut query = metrics.query(threshold.metric);
    for (k, v) in &threshold.tags {
        query = query.where_tag(k, v);
    }

    let observed = query
        .snapshot()
        .and_then(|snap| observed_value(&snap, threshold.expr.stat));

    let outcome = match observed {
        None => ThresholdOutcome::Inconclusive,
        Some(v) if threshold.expr.op.compare(v, threshold.expr.bound) => ThresholdOutcome::Passed,
        Some(_) => ThresholdOutcome::Failed,
    };

    ThresholdResult {
        metric: threshold.selector.clone(),
        expression: threshold.expression.clone(),
        outcome,
        observed,
        abort_on_fail: threshold.abort_on_fail,
    }
}

pub fn evaluate_thresholds(
    metrics: &Registry,
    thresholds: &[CompiledThreshold],
) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|t| evaluate_threshold(metrics, t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdSpec;
    use loadr_metrics::{MetricUnit, TagSet};

    fn set(selector: &str, exprs: &[&str]) -> ThresholdSet {
        ThresholdSet {
            selector: selector.to_string(),
            thresholds: exprs.iter().map(|e| ThresholdSpec::new(*e)).collect(),
        }
    }

    fn compile(metrics: &Registry, sets: &[ThresholdSet]) -> Vec<CompiledThreshold> {
        compile_thresholds(metrics, sets).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn unknown_metric_is_a_config_error() {
        let metrics = Registry::default();
        let err = compile_thresholds(&metrics, &[set("nope", &["count>0"])])
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        assert!(matches!(err, ThresholdError::UnknownMetric { .. }));
    }

    #[test]
    fn stat_kind_mismatch_is_a_config_error() {
        let metrics = Registry::default();
        metrics
            .register("hits", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));
        let err = compile_thresholds(&metrics, &[set("hits", &["p(95)<10"])])
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        assert!(matches!(err, ThresholdError::UnsupportedStat { .. }));
    }

    #[test]
    fn zero_samples_are_inconclusive() {
        let metrics = Registry::default();
        metrics
            .register("latency", MetricKind::Trend, MetricUnit::Time)
            .unwrap_or_else(|e| panic!("{e}"));
        metrics
            .register("failed", MetricKind::Rate, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));

        let compiled = compile(
            &metrics,
            &[set("latency", &["p(95)<800"]), set("failed", &["rate<0.01"])],
        );
        for result in evaluate_thresholds(&metrics, &compiled) {
            assert_eq!(result.outcome, ThresholdOutcome::Inconclusive);
            assert_eq!(result.observed, None);
        }
    }

    #[test]
    fn trend_percentiles_use_nearest_rank() {
        let metrics = Registry::default();
        let id = metrics
            .register("latency", MetricKind::Trend, MetricUnit::Time)
            .unwrap_or_else(|e| panic!("{e}"));
        let Some(t) = metrics.trend(id, TagSet::default()) else {
            panic!("expected trend");
        };
        for v in 1..=20 {
            t.add(f64::from(v) * 10.0);
        }

        let compiled = compile(
            &metrics,
            &[set(
                "latency",
                &["p(95)<=190", "p(95)<190", "max==200", "avg>100", "count==20", "med<100"],
            )],
        );
        let outcomes: Vec<ThresholdOutcome> = evaluate_thresholds(&metrics, &compiled)
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ThresholdOutcome::Passed,
                ThresholdOutcome::Failed,
                ThresholdOutcome::Passed,
                ThresholdOutcome::Passed,
                ThresholdOutcome::Passed,
                ThresholdOutcome::Failed,
            ]
        );
    }

    #[test]
    fn tagged_selector_filters_series() {
        let metrics = Registry::default();
        let id = metrics
            .register("latency", MetricKind::Trend, MetricUnit::Time)
            .unwrap_or_else(|e| panic!("{e}"));
        let fast = metrics.resolve_tags(&[("endpoint", "categories")]);
        let slow = metrics.resolve_tags(&[("endpoint", "products")]);
        if let Some(t) = metrics.trend(id, fast) {
            t.add(100.0);
        }
        if let Some(t) = metrics.trend(id, slow) {
            t.add(2000.0);
        }

        let compiled = compile(
            &metrics,
            &[
                set("latency{endpoint:categories}", &["max<500"]),
                set("latency", &["max<500"]),
                set("latency{endpoint:unknown}", &["max<500"]),
            ],
        );
        let results = evaluate_thresholds(&metrics, &compiled);
        assert_eq!(results[0].outcome, ThresholdOutcome::Passed);
        assert_eq!(results[1].outcome, ThresholdOutcome::Failed);
        assert_eq!(results[1].observed, Some(2000.0));
        assert_eq!(results[2].outcome, ThresholdOutcome::Inconclusive);
    }

    #[test]
    fn rate_and_counter_thresholds() {
        let metrics = Registry::default();
        let failed = metrics
            .register("http_req_failed", MetricKind::Rate, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));
        let reqs = metrics
            .register("total_requests", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));

        if let Some(r) = metrics.rate(failed, TagSet::default()) {
            r.add_many(1, 100);
        }
        if let Some(c) = metrics.counter(reqs, TagSet::default()) {
            c.add(100);
        }

        let compiled = compile(
            &metrics,
            &[
                set("http_req_failed", &["rate<0.005", "rate<=0.01"]),
                set("total_requests", &["count>0"]),
            ],
        );
        let results = evaluate_thresholds(&metrics, &compiled);
        assert_eq!(results[0].outcome, ThresholdOutcome::Failed);
        assert_eq!(results[0].observed, Some(0.01));
        assert_eq!(results[1].outcome, ThresholdOutcome::Passed);
        assert_eq!(results[2].outcome, ThresholdOutcome::Passed);
    }
}
