//! Wire types for the authentication service and the renewal seam
//!
//! The service speaks camelCase JSON. Access tokens are deserialized straight
//! into `Secret` so they are redacted in every `Debug` rendering.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_EXPIRES_IN_SECS;
use crate::error::Result;

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Body of a successful `POST /auth/refresh`.
///
/// `expires_in` is a delta in seconds from the response time. The credential
/// store converts it to an absolute instant when storing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

/// Body of a successful `POST /auth/login`.
///
/// Older backends send `token` instead of `accessToken` and may omit
/// `expiresIn`; both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: Secret<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub user: Option<User>,
}

impl LoginResponse {
    /// The token grant carried by this login.
    pub fn grant(&self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token.clone(),
            expires_in: self.expires_in,
        }
    }
}

/// User identity cached alongside the credential.
///
/// Only `email` is guaranteed; anything else the backend sends is kept in
/// `extra` so a profile round-trips unchanged through the durable mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `GET /auth/profile` answers either `{"user": {...}}` or the bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProfileBody {
    Wrapped { user: User },
    Bare(User),
}

impl ProfileBody {
    pub fn into_user(self) -> User {
        match self {
            ProfileBody::Wrapped { user } | ProfileBody::Bare(user) => user,
        }
    }
}

/// Issues the renewal call against the authentication service.
///
/// The refresh coordinator holds one of these and calls it at most once per
/// renewal cycle. Uses `Pin<Box<dyn Future>>` so it can be held as
/// `Arc<dyn TokenRenewer>` and swapped for an in-process fake in tests.
pub trait TokenRenewer: Send + Sync {
    /// Exchange the renewal credential for a fresh access token.
    fn renew(&self) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + '_>>;
}
