use thiserror::Error;

/// Terminal failures of one generation run.
///
/// Retryable HTTP statuses never surface on their own; the executor folds
/// them into `ExhaustedAttempts` once the plan runs out.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "all {attempts} auth/path attempts failed; last error: {}",
        .last_error.as_deref().unwrap_or("none")
    )]
    ExhaustedAttempts {
        attempts: usize,
        last_error: Option<String>,
    },

    #[error("API error ({status}): {body}")]
    FatalHttp { status: u16, body: String },

    #[error("network error ({url}): {message}")]
    Network { url: String, message: String },

    #[error("unexpected response: {reason}")]
    ResponseShape {
        reason: String,
        model_text: Vec<String>,
    },
}

impl GenerateError {
    pub fn response_shape(reason: impl Into<String>) -> Self {
        Self::ResponseShape {
            reason: reason.into(),
            model_text: Vec::new(),
        }
    }

    /// Short machine-readable tag used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::ExhaustedAttempts { .. } => "exhausted_attempts",
            Self::FatalHttp { .. } => "fatal_http",
            Self::Network { .. } => "network",
            Self::ResponseShape { .. } => "response_shape",
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerateError>;
