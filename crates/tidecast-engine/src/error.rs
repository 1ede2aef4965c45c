use thiserror::Error;

/// Errors raised by clock-variable unification.
#[derive(Debug, Clone, Error)]
pub enum ClockError {
    /// Two distinct known clocks were unified.
    #[error("a source cannot belong to clock `{left}` and clock `{right}` at once")]
    Conflict { left: String, right: String },
}

/// Failures raised by sources during startup or streaming.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{message}")]
    Failed { message: String },
    #[error("source io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// A source that failed to start, as reported by `start_outputs`.
#[derive(Debug, Error)]
#[error("startup of source `{source_id}` failed: {error}")]
pub struct StartupError {
    pub source_id: String,
    pub error: SourceError,
}
