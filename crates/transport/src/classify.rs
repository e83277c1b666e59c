//! Authorization failure classification
//!
//! The API marks a 401 caused by an expired access token with a
//! machine-readable `code: "TOKEN_EXPIRED"`. Only that case is retryable
//! through renewal; every other 401, and every 403, ends the session.

use auth_client::TOKEN_EXPIRED_CODE;

/// Why a response refused authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Access token expired; renew and resend once
    TokenExpired,
    /// Missing, malformed or revoked token
    Unauthorized,
    /// Authenticated but not allowed
    Forbidden,
}

impl AuthFailure {
    /// Label for logs and the invalidation metric.
    pub fn label(&self) -> &'static str {
        match self {
            AuthFailure::TokenExpired => "token_expired",
            AuthFailure::Unauthorized => "unauthorized",
            AuthFailure::Forbidden => "forbidden",
        }
    }
}

/// Extract the error code from a JSON error body.
///
/// Accepts `{"code": "..."}` and `{"error": {"code": "..."}}`.
pub fn error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("code")
        .or_else(|| value.get("error").and_then(|e| e.get("code")))
        .and_then(|c| c.as_str())
        .map(str::to_owned)
}

/// Classify a response by status and body. `None` means it is not an
/// authorization failure and passes through untouched.
pub fn classify_status(status: u16, body: &str) -> Option<AuthFailure> {
    match status {
        401 => match error_code(body) {
            Some(code) if code == TOKEN_EXPIRED_CODE => Some(AuthFailure::TokenExpired),
            _ => Some(AuthFailure::Unauthorized),
        },
        403 => Some(AuthFailure::Forbidden),
        _ => None,
    }
}
