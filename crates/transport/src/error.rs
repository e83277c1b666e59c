//! Error taxonomy surfaced to callers of the authenticated transport
//!
//! An expired token never shows up here: the transport absorbs it through
//! renewal. What reaches the caller is either terminal for the session
//! (`SessionInvalid`) or unrelated to authentication.

/// Errors from authenticated requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Renewal failed, or authorization was refused for a reason renewal
    /// cannot fix. The credential has already been cleared; route the user
    /// to re-authentication.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// Network failure or timeout; no retry was attempted.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success status the caller asked to be turned into an error via
    /// `ApiResponse::error_for_status`.
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl Error {
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Error::SessionInvalid(_))
    }
}

impl From<refresh::Error> for Error {
    fn from(err: refresh::Error) -> Self {
        match err {
            refresh::Error::SessionInvalid(msg) => Error::SessionInvalid(msg),
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_failure_maps_to_session_invalid() {
        let err: Error = refresh::Error::SessionInvalid("revoked".into()).into();
        assert!(err.is_session_invalid());
        assert_eq!(err.to_string(), "session invalid: revoked");
    }

    #[test]
    fn status_error_display_includes_body() {
        let err = Error::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "upstream returned 500: boom");
        assert!(!err.is_session_invalid());
    }
}
