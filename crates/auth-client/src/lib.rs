//! Authentication service client and access credential storage
//!
//! Holds the short-lived access token in memory (`CredentialStore`), talks to
//! the authentication service (`AuthClient`), and defines the `TokenRenewer`
//! seam the refresh coordinator renews through.
//!
//! Credential flow:
//! 1. Session glue calls `AuthClient::login()`; the service sets the renewal cookie
//! 2. Access token stored via `CredentialStore::set()`
//! 3. Transport reads it via `CredentialStore::lookup()` for every request
//! 4. On expiry the coordinator calls `TokenRenewer::renew()` and stores the result
//! 5. Logout or a failed renewal tears down via `CredentialStore::clear()`

pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod mirror;
pub mod token;

pub use client::{AuthClient, build_http_client};
pub use constants::*;
pub use credentials::{Credential, CredentialLookup, CredentialStore};
pub use error::{Error, Result};
pub use mirror::{CredentialMirror, MirrorSnapshot};
pub use token::{LoginResponse, ProfileBody, TokenGrant, TokenRenewer, User};
