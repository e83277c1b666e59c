//! Service-specific error types

use thiserror::Error;

/// Session lifecycle errors.
///
/// `SessionInvalid` is the only variant that means "log in again"; the
/// credential has already been cleared when it is returned.
#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication service error: {0}")]
    Auth(String),

    #[error("session invalid: {0}")]
    SessionInvalid(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<auth_client::Error> for Error {
    fn from(err: auth_client::Error) -> Self {
        Error::Auth(err.to_string())
    }
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::SessionInvalid(msg) => Error::SessionInvalid(msg),
            other => Error::Request(other.to_string()),
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_session_invalid_stays_session_invalid() {
        let err: Error = transport::Error::SessionInvalid("forbidden".into()).into();
        assert!(matches!(err, Error::SessionInvalid(ref m) if m == "forbidden"));
    }

    #[test]
    fn other_transport_errors_become_request_errors() {
        let err: Error = transport::Error::Transport("connection refused".into()).into();
        assert!(matches!(err, Error::Request(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn auth_errors_keep_their_message() {
        let err: Error = auth_client::Error::InvalidCredentials("bad password".into()).into();
        assert_eq!(
            err.to_string(),
            "authentication service error: invalid credentials: bad password"
        );
    }
}
