//! Error types for token renewal

/// Outcome of a failed renewal, fanned out to every waiter.
///
/// `Clone` because one renewal settles many callers with the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The renewal call failed; the credential has been cleared and the user
    /// has to authenticate again.
    #[error("session invalid: {0}")]
    SessionInvalid(String),
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, Error>;
