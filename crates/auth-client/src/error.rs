//! Error types for authentication service calls and credential storage

/// Errors from authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// 401/403 from the authentication service: bad password, or a missing,
    /// invalid or revoked renewal cookie.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unexpected response: {0}")]
    UnexpectedStatus(String),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("credential mirror parse error: {0}")]
    MirrorParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
