use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use loadr_core::{ProgressFn, RunSummary, ScenarioConfig};

use super::OutputFormatter;

/// Writes the summary as one JSON document on stdout. No progress output.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _script_path: &Path, _scenarios: &[ScenarioConfig]) {}

    fn progress(&self, _scenarios: &[ScenarioConfig]) -> Option<ProgressFn> {
        None
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, summary).context("failed to write JSON summary")?;
        writeln!(stdout).context("failed to write JSON summary")?;
        stdout.flush().context("failed to flush stdout")
    }
}
