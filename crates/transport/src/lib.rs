//! Authenticated HTTP transport for the API
//!
//! Wraps outbound requests with the current bearer token, recognizes the
//! API's expired-token rejection, and resends through a single-flight
//! renewal. Authorization failures renewal cannot fix clear the credential
//! and surface as `Error::SessionInvalid`.

pub mod authenticated;
pub mod classify;
pub mod error;
pub mod request;

pub use authenticated::{AuthenticatedTransport, RetryState};
pub use classify::{AuthFailure, classify_status};
pub use error::{Error, Result};
pub use request::{ApiRequest, ApiResponse};
