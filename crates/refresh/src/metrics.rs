//! Renewal metrics
//!
//! - `auth_refresh_total` (counter): label `outcome` (`success` | `failure`)
//! - `auth_refresh_joined_total` (counter): callers that joined an in-flight renewal
//! - `auth_session_invalidated_total` (counter): label `reason`
//!
//! No-ops unless the host process installs a recorder.

/// Record one completed renewal call.
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a caller that waited on a renewal somebody else started.
pub fn record_joined() {
    metrics::counter!("auth_refresh_joined_total").increment(1);
}

/// Record a session teardown.
pub fn record_invalidated(reason: &'static str) {
    metrics::counter!("auth_session_invalidated_total", "reason" => reason).increment(1);
}
