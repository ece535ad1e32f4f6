use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }

    /// Script problems are the user's to fix, except a read failure other than a missing file.
    pub fn from_script(err: loadr_script::Error) -> Self {
        let invalid = match &err {
            loadr_script::Error::Read { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidData
                    | std::io::ErrorKind::IsADirectory
            ),
            _ => true,
        };
        let err = anyhow::Error::new(err).context("failed to load script");
        if invalid {
            Self::InvalidInput(err)
        } else {
            Self::RuntimeError(err)
        }
    }

    pub fn from_core(context: &'static str, err: loadr_core::Error) -> Self {
        let invalid = err.is_config();
        let err = anyhow::Error::new(err).context(context);
        if invalid {
            Self::InvalidInput(err)
        } else {
            Self::RuntimeError(err)
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => {
                write!(f, "{e:#}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
