//! HTTP client for the authentication service
//!
//! Login, register, refresh, logout and logout-all POST to paths under the
//! configured API base URL. The renewal credential is a server-managed cookie,
//! so the `reqwest::Client` passed in must have its cookie store enabled (see
//! `build_http_client`) and must be the same client the transport uses.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use tracing::{debug, info};

use crate::constants::{LOGIN_PATH, LOGOUT_ALL_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::error::{Error, Result};
use crate::token::{LoginResponse, TokenGrant, TokenRenewer};

/// Build the shared HTTP client: cookie store on, general request timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(format!("building HTTP client: {e}")))
}

/// Calls the unauthenticated session endpoints of the authentication service.
///
/// Clone is cheap: `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a service path such as `/auth/login`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Exchange email and password for an access token. The response also
    /// sets the renewal cookie.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<LoginResponse> {
        let response = self
            .client
            .post(self.endpoint(LOGIN_PATH))
            .json(&serde_json::json!({
                "email": email,
                "password": password.expose(),
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

        let response = check_status(response, "login").await?;
        let login = response
            .json::<LoginResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("invalid login response: {e}")))?;
        info!(expires_in = login.expires_in, "login succeeded");
        Ok(login)
    }

    /// Create an account. Does not log in.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &Secret<String>,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.endpoint(REGISTER_PATH))
            .json(&serde_json::json!({
                "username": username,
                "email": email,
                "password": password.expose(),
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("register request failed: {e}")))?;

        let response = check_status(response, "register").await?;
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("invalid register response: {e}")))
    }

    /// Obtain a new access token using the renewal cookie. No body, no
    /// Authorization header.
    pub async fn refresh(&self) -> Result<TokenGrant> {
        let response = self
            .client
            .post(self.endpoint(REFRESH_PATH))
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let response = check_status(response, "token refresh").await?;
        let grant = response
            .json::<TokenGrant>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("invalid refresh response: {e}")))?;
        debug!(expires_in = grant.expires_in, "token refresh succeeded");
        Ok(grant)
    }

    /// Revoke this device's renewal cookie.
    pub async fn logout(&self, access: Option<&Secret<String>>) -> Result<()> {
        self.post_revocation(LOGOUT_PATH, access, "logout").await
    }

    /// Revoke every renewal credential of the user.
    pub async fn logout_all(&self, access: Option<&Secret<String>>) -> Result<()> {
        self.post_revocation(LOGOUT_ALL_PATH, access, "logout-all")
            .await
    }

    async fn post_revocation(
        &self,
        path: &str,
        access: Option<&Secret<String>>,
        what: &str,
    ) -> Result<()> {
        let mut request = self.client.post(self.endpoint(path));
        if let Some(token) = access {
            request = request.header(reqwest::header::AUTHORIZATION, token.bearer());
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("{what} request failed: {e}")))?;
        check_status(response, what).await?;
        Ok(())
    }
}

impl TokenRenewer for AuthClient {
    fn renew(&self) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + '_>> {
        Box::pin(self.refresh())
    }
}

/// Turn a non-success status into an error, keeping the body for context.
/// 401/403 mean the presented credentials were rejected.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(Error::InvalidCredentials(format!(
            "{what} rejected ({status}): {body}"
        )));
    }

    Err(Error::UnexpectedStatus(format!(
        "{what} returned {status}: {body}"
    )))
}
