use std::fmt::Write as _;

use loadr_core::metrics::{MetricKind, MetricUnit};
use loadr_core::{MetricSummary, RunSummary, ThresholdOutcome};

use super::format::*;

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    writeln!(
        out,
        "status: {} (elapsed {})",
        summary.status,
        format_elapsed(summary.elapsed())
    )
    .ok();
    if let Some(reason) = &summary.abort_reason {
        writeln!(out, "aborted: {reason}").ok();
    }

    render_scenarios(summary, &mut out);
    render_checks(summary, &mut out);
    render_metrics(summary, &mut out);
    render_thresholds(summary, &mut out);

    out
}

fn render_scenarios(summary: &RunSummary, out: &mut String) {
    if summary.scenarios.is_empty() {
        return;
    }

    out.push_str("\nscenarios\n");
    for s in &summary.scenarios {
        if s.skipped {
            writeln!(out, "  {}: skipped", s.name).ok();
            continue;
        }
        write!(
            out,
            "  {}: vus={} iterations={} failed={}",
            s.name, s.workers, s.iterations, s.failed_iterations
        )
        .ok();
        if s.interrupted > 0 {
            write!(out, " interrupted={}", s.interrupted).ok();
        }
        if s.panicked > 0 {
            write!(out, " panicked={}", s.panicked).ok();
        }
        out.push('\n');
    }
}

fn render_checks(summary: &RunSummary, out: &mut String) {
    if summary.checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    let mut current_group: Option<Option<&str>> = None;
    for c in &summary.checks {
        let group = c.group.as_deref();
        if current_group != Some(group) {
            current_group = Some(group);
            writeln!(out, "  group: {}", group.unwrap_or("-")).ok();
        }
        let status = if c.fails > 0 { "FAIL" } else { "OK" };
        writeln!(
            out,
            "    {}: pass={} fail={} [{status}]",
            c.name, c.passes, c.fails
        )
        .ok();
    }
}

fn format_value(unit: MetricUnit, v: f64) -> String {
    match unit {
        MetricUnit::Time => format_millis(v),
        MetricUnit::Data => format_bytes(v.max(0.0).round() as u64),
        MetricUnit::Default => format_number(v),
    }
}

fn metric_line(m: &MetricSummary) -> String {
    let get = |key: &str| m.values.get(key).copied().unwrap_or_default();
    match m.kind {
        MetricKind::Counter => {
            let count = get("count");
            match m.unit {
                MetricUnit::Data => format!(
                    "{} {}/s",
                    format_bytes(count.round() as u64),
                    format_bytes(get("rate").round() as u64)
                ),
                _ => format!("{} {}/s", format_number(count), format_rate(get("rate"))),
            }
        }
        MetricKind::Gauge => format!(
            "value={} max={}",
            format_value(m.unit, get("value")),
            format_value(m.unit, get("max"))
        ),
        MetricKind::Rate => format!(
            "{:.2}% ({} of {})",
            get("rate") * 100.0,
            format_number(get("passes")),
            format_number(get("passes") + get("fails"))
        ),
        MetricKind::Trend => {
            let mut line = format!("count={}", format_number(get("count")));
            for (stat, v) in m.values.iter().filter(|(k, _)| k.as_str() != "count") {
                write!(line, " {stat}={}", format_value(m.unit, *v)).ok();
            }
            if m.approximate {
                line.push_str(" (approx.)");
            }
            line
        }
    }
}

fn render_metrics(summary: &RunSummary, out: &mut String) {
    if summary.metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    let width = summary.metrics.keys().map(String::len).max().unwrap_or(0) + 2;
    for (name, m) in &summary.metrics {
        writeln!(out, "  {name:.<width$}: {}", metric_line(m)).ok();
    }
}

fn render_thresholds(summary: &RunSummary, out: &mut String) {
    if summary.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &summary.thresholds {
        let status = match t.outcome {
            ThresholdOutcome::Passed => "OK",
            ThresholdOutcome::Failed => "FAIL",
            ThresholdOutcome::Inconclusive => "NO DATA",
        };
        match t.observed {
            Some(v) => writeln!(
                out,
                "  {}: {} observed={} [{status}]",
                t.metric,
                t.expression,
                format_number(v)
            )
            .ok(),
            None => writeln!(out, "  {}: {} [{status}]", t.metric, t.expression).ok(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_core::{CheckSummary, RunStatus, ScenarioReport, ThresholdResult};
    use std::collections::BTreeMap;

    fn summary() -> RunSummary {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "http_req_duration".to_string(),
            MetricSummary {
                kind: MetricKind::Trend,
                unit: MetricUnit::Time,
                values: BTreeMap::from([
                    ("count".to_string(), 200.0),
                    ("avg".to_string(), 51.5),
                    ("p(95)".to_string(), 1200.0),
                ]),
                approximate: false,
            },
        );
        metrics.insert(
            "http_req_failed".to_string(),
            MetricSummary {
                kind: MetricKind::Rate,
                unit: MetricUnit::Default,
                values: BTreeMap::from([
                    ("rate".to_string(), 0.01),
                    ("passes".to_string(), 2.0),
                    ("fails".to_string(), 198.0),
                ]),
                approximate: false,
            },
        );

        RunSummary {
            status: RunStatus::Failed,
            aborted: false,
            abort_reason: None,
            elapsed_ms: 190_400,
            scenarios: vec![
                ScenarioReport {
                    name: "categories_details_5vus".to_string(),
                    skipped: false,
                    workers: 5,
                    iterations: 48,
                    failed_iterations: 1,
                    interrupted: 0,
                    panicked: 0,
                },
                ScenarioReport {
                    name: "late".to_string(),
                    skipped: true,
                    ..ScenarioReport::default()
                },
            ],
            metrics,
            checks: vec![CheckSummary {
                group: Some("::Products - Categories Details".to_string()),
                name: "status is 2xx".to_string(),
                passes: 198,
                fails: 2,
            }],
            thresholds: vec![
                ThresholdResult {
                    metric: "http_req_failed".to_string(),
                    expression: "rate<0.005".to_string(),
                    outcome: ThresholdOutcome::Failed,
                    observed: Some(0.01),
                    abort_on_fail: false,
                },
                ThresholdResult {
                    metric: "cart_duration".to_string(),
                    expression: "p(95)<800".to_string(),
                    outcome: ThresholdOutcome::Inconclusive,
                    observed: None,
                    abort_on_fail: false,
                },
            ],
        }
    }

    #[test]
    fn renders_every_section() {
        let text = render(&summary());
        assert!(text.starts_with("status: failed (elapsed 3m 10s)"));
        assert!(text.contains("categories_details_5vus: vus=5 iterations=48 failed=1"));
        assert!(text.contains("late: skipped"));
        assert!(text.contains("group: ::Products - Categories Details"));
        assert!(text.contains("status is 2xx: pass=198 fail=2 [FAIL]"));
        assert!(text.contains("count=200 avg=51.50ms p(95)=1.20s"));
        assert!(text.contains("1.00% (2 of 200)"));
        assert!(text.contains("http_req_failed: rate<0.005 observed=0.01 [FAIL]"));
        assert!(text.contains("cart_duration: p(95)<800 [NO DATA]"));
    }

    #[test]
    fn renders_abort_reason() {
        let mut s = summary();
        s.aborted = true;
        s.abort_reason = Some(loadr_core::AbortReason::Timeout);
        assert!(render(&s).contains("aborted: run timeout reached"));
    }
}
