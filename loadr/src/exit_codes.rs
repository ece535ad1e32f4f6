use loadr_core::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// No threshold failed, but at least one saw no samples.
    ThresholdsInconclusive = 13,

    /// Invalid CLI/config/options (bad flags, invalid durations, invalid script or thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants, panics caught at top-level).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Checks never affect the exit code; only threshold outcomes do.
    #[must_use]
    pub fn from_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Passed => Self::Success,
            RunStatus::Failed => Self::ThresholdsFailed,
            RunStatus::Inconclusive => Self::ThresholdsInconclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_run_status() {
        assert_eq!(ExitCode::from_status(RunStatus::Passed).as_i32(), 0);
        assert_eq!(ExitCode::from_status(RunStatus::Failed).as_i32(), 11);
        assert_eq!(ExitCode::from_status(RunStatus::Inconclusive).as_i32(), 13);
    }
}
