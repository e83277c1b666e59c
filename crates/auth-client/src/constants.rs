//! Authentication service contract constants
//!
//! Paths are relative to the configured API base URL (for example
//! `http://localhost:5000/api`).

use std::time::Duration;

/// Establishes a session and sets the renewal cookie
pub const LOGIN_PATH: &str = "/auth/login";

/// Creates an account; the client logs in afterwards
pub const REGISTER_PATH: &str = "/auth/register";

/// Issues a new access token from the renewal cookie (no body)
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Revokes the renewal cookie for this device
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Revokes every renewal credential of the user
pub const LOGOUT_ALL_PATH: &str = "/auth/logout-all";

/// Returns the user the access token belongs to
pub const PROFILE_PATH: &str = "/auth/profile";

/// Lifetime assumed when a login/refresh response omits `expiresIn` (15 minutes)
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 900;

/// A token is treated as absent this long before its real expiry so it never
/// expires while a request is in flight.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Longest token lifetime honored; larger `expiresIn` values are clamped.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Machine-readable code on a 401 body marking the access token as expired
/// (retryable through renewal). Every other 401 is terminal for the session.
pub const TOKEN_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

/// Fallback base URL when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
