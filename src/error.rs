use thiserror::Error;

/// Error taxonomy shared across every fallible component operation.
///
/// The retry policy lives with the caller, not the variant, but the variant
/// names double as the policy table: `ConnectionError`/`ApiError(5xx)`/`StoreError`/
/// `OracleError` are retried with backoff, `ValidationError`/`TradeExecutionError`
/// never are.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("api error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("store error: {0}")]
    StoreError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("trade execution error: {0}")]
    TradeExecutionError(String),

    #[error("oracle error: {0}")]
    OracleError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Whether this error class is safe to retry per the component error policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ConnectionError(_) => true,
            EngineError::ApiError { status, .. } => *status >= 500 || *status == 429,
            EngineError::StoreError(_) => true,
            EngineError::OracleError(_) => true,
            EngineError::ValidationError(_) => false,
            EngineError::TradeExecutionError(_) => false,
            EngineError::Unknown(_) => false,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            EngineError::ApiError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            EngineError::ConnectionError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::ValidationError(e.to_string())
    }
}
