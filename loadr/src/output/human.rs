use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use loadr_core::{ProgressFn, ProgressUpdate, RunSummary, ScenarioConfig, ScenarioPhase};

mod format;
mod progress;
mod summary;

use format::{format_elapsed, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

/// Bar of the whole run, next to the per-scenario bars.
const RUN_BAR: &str = "run";

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

/// Start offset and window of a scenario.
#[derive(Debug, Clone, Copy)]
struct Timeline {
    start: Duration,
    window: Duration,
}

fn scenario_message(u: &ProgressUpdate, name: &str) -> Option<String> {
    let s = u.scenarios.iter().find(|s| s.name == name)?;
    Some(match s.phase {
        ScenarioPhase::Pending | ScenarioPhase::Skipped | ScenarioPhase::Finished => {
            s.phase.to_string()
        }
        ScenarioPhase::Running | ScenarioPhase::Stopping => format!(
            "{} vus={}/{} iterations={}",
            s.phase, s.running_workers, s.vus, s.iterations
        ),
    })
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, script_path: &Path, scenarios: &[ScenarioConfig]) {
        println!("script: {}", script_path.display());
        for s in scenarios {
            println!(
                "scenario: {} exec={} executor={} vus={} start={} window={}",
                s.name,
                s.exec,
                s.executor.kind(),
                s.vus(),
                format_elapsed(s.start_time),
                format_elapsed(s.window()),
            );
        }
        if !scenarios.is_empty() {
            println!();
        }
    }

    fn progress(&self, scenarios: &[ScenarioConfig]) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let timelines: HashMap<String, Timeline> = scenarios
            .iter()
            .map(|s| {
                (
                    s.name.to_string(),
                    Timeline {
                        start: s.start_time,
                        window: s.window(),
                    },
                )
            })
            .collect();
        let run_end = timelines
            .values()
            .map(|t| t.start + t.window)
            .max()
            .unwrap_or_default();

        Some(Arc::new(move |u: ProgressUpdate| {
            let secs = u.elapsed.as_secs_f64().max(1e-9);
            progress.update(
                RUN_BAR,
                run_end,
                u.elapsed,
                format!(
                    "{} vus={} iterations={} requests={} failed={} rps={}",
                    u.state,
                    u.active_vus,
                    u.iterations_total,
                    u.requests_total,
                    u.failed_requests_total,
                    format_rate(u.requests_total as f64 / secs),
                ),
            );

            for (name, t) in &timelines {
                let Some(message) = scenario_message(&u, name) else {
                    continue;
                };
                progress.update(name, t.window, u.elapsed.saturating_sub(t.start), message);
            }
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        if summary.thresholds_failed() > 0 {
            eprintln!("thresholds failed:");
            for t in summary
                .thresholds
                .iter()
                .filter(|t| t.outcome == loadr_core::ThresholdOutcome::Failed)
            {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {}", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}
