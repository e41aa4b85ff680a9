use thiserror::Error;

/// Configuration and IO errors shared by the roster crates
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by a completion engine call
#[derive(Error, Debug)]
pub enum CompletionError {
    /// The engine could not be reached (connection refused, DNS)
    #[error("Completion engine unavailable: {0}")]
    Unavailable(String),

    /// The request was sent but no reply arrived within the client timeout
    #[error("Completion request timed out: {0}")]
    Timeout(String),

    #[error("HTTP Error: {status_code} - {message}")]
    HttpError { status_code: u16, message: String },

    #[error("Parsing Error: {0}")]
    ParsingError(String),

    /// The engine answered but produced no text
    #[error("Completion engine returned an empty response")]
    EmptyResponse,

    #[error("Configuration Error: {0}")]
    ConfigError(String),
}

impl CompletionError {
    /// Whether the loop may treat this as a malformed cycle instead of a fatal fault
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CompletionError::EmptyResponse | CompletionError::Timeout(_))
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            CompletionError::Unavailable(err.to_string())
        } else if err.is_decode() {
            CompletionError::ParsingError(err.to_string())
        } else if let Some(status) = err.status() {
            CompletionError::HttpError {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            CompletionError::Unavailable(err.to_string())
        }
    }
}

/// Result type for completion engine operations
pub type CompletionResult<T> = Result<T, CompletionError>;
