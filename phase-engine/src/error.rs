// Engine Errors
// Failures surfaced while executing phases and driving streams

use thiserror::Error;

/// Error raised while a phase or the driver runs
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The user implementation returned an error
    #[error("phase '{phase}' failed: {source}")]
    Implementation {
        phase: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The driver could not run the phase's work (join failure, resume on a
    /// phase that never yields)
    #[error("phase '{phase}' could not be scheduled: {message}")]
    Scheduler { phase: String, message: String },

    #[error("phase '{phase}' has no port named '{port}'")]
    UnknownPort { phase: String, port: String },

    /// A resume token was handed to a phase that did not issue it
    #[error("phase '{phase}' cannot resume a token issued by phase id '{issued_by}'")]
    ForeignResumeToken { phase: String, issued_by: String },
}

impl PhaseError {
    pub fn phase(&self) -> &str {
        match self {
            PhaseError::Implementation { phase, .. }
            | PhaseError::Scheduler { phase, .. }
            | PhaseError::UnknownPort { phase, .. }
            | PhaseError::ForeignResumeToken { phase, .. } => phase,
        }
    }
}

pub type PhaseResult<T> = Result<T, PhaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_error_keeps_source() {
        let err = PhaseError::Implementation {
            phase: "parse".to_string(),
            source: anyhow::anyhow!("bad input").into(),
        };

        assert_eq!(err.phase(), "parse");
        assert_eq!(err.to_string(), "phase 'parse' failed: bad input");
        assert!(std::error::Error::source(&err).is_some());
    }
}
