use thiserror::Error;

/// Failures surfaced by the history/forecast/recommendation pipeline and by
/// discovery. Each variant is reported to the caller as-is; nothing is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// `not_found` marks an unknown ticker or an empty range, as opposed to
    /// an upstream failure.
    #[error("data unavailable for {ticker}: {detail}")]
    DataUnavailable {
        ticker: String,
        detail: String,
        not_found: bool,
    },

    #[error("insufficient history: need at least {required} bars, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("model training failed: {0}")]
    ModelTrainingError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn data_unavailable(ticker: &str, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            detail: detail.into(),
            not_found: false,
        }
    }

    pub fn not_found(ticker: &str, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            detail: detail.into(),
            not_found: true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DataUnavailable { not_found: true, .. })
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidRequest(detail.into())
    }

    /// Stable machine-readable name, used in API error bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::InsufficientHistory { .. } => "insufficient_history",
            Self::ModelTrainingError(_) => "model_training_error",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
