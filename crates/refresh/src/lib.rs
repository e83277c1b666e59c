//! Single-flight access token renewal
//!
//! `RefreshCoordinator` sits between the authenticated transport and the
//! authentication service. When requests discover an expired token it issues
//! exactly one renewal, stores the result in the shared `CredentialStore`, and
//! hands the same token (or the same failure) to every caller that asked in
//! the meantime. A failed renewal clears the store, so the next request in
//! the process already sees "no credential".

pub mod coordinator;
pub mod error;
pub mod metrics;

pub use coordinator::RefreshCoordinator;
pub use error::{Error, Result};
