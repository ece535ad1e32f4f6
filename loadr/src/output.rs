use crate::cli::OutputFormat;
use std::path::Path;

use loadr_core::{ProgressFn, RunSummary, ScenarioConfig};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, script_path: &Path, scenarios: &[ScenarioConfig]);
    fn progress(&self, scenarios: &[ScenarioConfig]) -> Option<ProgressFn>;
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
