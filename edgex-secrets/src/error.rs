use thiserror::Error;

/// Errors raised while talking to the secret store.
///
/// None of these escape the lifecycle manager's public getters; they are
/// logged and turned into empty tokens or credentials there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Could not read token file {path}: {reason}")]
    TokenFile { path: String, reason: String },

    #[error("Token file is not valid JSON: {0}")]
    TokenFormat(String),

    #[error("No valid secret-store token available")]
    MissingToken,

    #[error("Access denied by secret store at {endpoint}")]
    AccessDenied { endpoint: String },

    #[error("Secret store returned HTTP {status} for {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Malformed secret-store response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("Reached retry limit after {attempts} attempts: {last_error}")]
    RetryLimitExceeded { attempts: u32, last_error: String },

    #[error("Token regeneration failed: {0}")]
    Regeneration(String),
}

/// Result type for secret-store operations
pub type Result<T> = std::result::Result<T, CredentialError>;
