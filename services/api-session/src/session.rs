//! Session lifecycle: login, registration, logout, profile and restore
//!
//! `SessionManager` wires the authentication client, credential store,
//! refresh coordinator and authenticated transport around one shared
//! cookie-carrying HTTP client. Login and logout talk to the authentication
//! endpoints directly; everything else goes through the transport.

use std::sync::Arc;

use auth_client::{
    AuthClient, CredentialMirror, CredentialStore, PROFILE_PATH, ProfileBody, User,
    build_http_client,
};
use common::Secret;
use refresh::RefreshCoordinator;
use tracing::{debug, info, warn};
use transport::AuthenticatedTransport;

use crate::config::Config;
use crate::error::{Error, Result};

pub struct SessionManager {
    auth: AuthClient,
    transport: AuthenticatedTransport,
}

impl SessionManager {
    pub fn new(auth: AuthClient, transport: AuthenticatedTransport) -> Self {
        Self { auth, transport }
    }

    /// Build the full client stack from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = build_http_client(config.api.timeout())?;
        let auth = AuthClient::new(http.clone(), config.api.base_url.clone());

        let mut store = CredentialStore::new().with_safety_margin(config.auth.safety_margin());
        if let Some(path) = &config.auth.mirror_path {
            store = store.with_mirror(CredentialMirror::new(path));
        }

        let coordinator = RefreshCoordinator::new(Arc::new(store), Arc::new(auth.clone()));
        let transport = AuthenticatedTransport::new(http, config.api.base_url.clone(), coordinator);
        Ok(Self::new(auth, transport))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.transport.store()
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    pub async fn current_user(&self) -> Option<User> {
        self.store().user().await
    }

    /// Log in and cache the user.
    ///
    /// The profile endpoint's user is preferred over the one embedded in the
    /// login response, which is only used when the profile call fails for a
    /// reason other than an invalid session.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<Option<User>> {
        let login = self.auth.login(email, password).await?;
        let grant = login.grant();
        self.store().set(grant.access_token, grant.expires_in).await;
        if let Some(user) = login.user.clone() {
            self.store().set_user(user).await;
        }
        info!("logged in");

        match self.profile().await {
            Ok(user) => Ok(Some(user)),
            Err(Error::SessionInvalid(reason)) => Err(Error::SessionInvalid(reason)),
            Err(e) => {
                warn!(error = %e, "profile fetch after login failed, using login response user");
                Ok(login.user)
            }
        }
    }

    /// Create an account, then log in with the same credentials.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &Secret<String>,
    ) -> Result<Option<User>> {
        self.auth.register(username, email, password).await?;
        info!(username, "registered account");
        self.login(email, password).await
    }

    /// Revoke this device's session. Local state is cleared even when the
    /// server call fails.
    pub async fn logout(&self) -> Result<()> {
        let token = self.store().get().await;
        if let Err(e) = self.auth.logout(token.as_ref()).await {
            warn!(error = %e, "logout request failed, clearing local session anyway");
        }
        self.store().clear().await;
        info!("logged out");
        Ok(())
    }

    /// Revoke every session of the user. Local state is cleared even when the
    /// server call fails.
    pub async fn logout_all(&self) -> Result<()> {
        let token = self.store().get().await;
        if let Err(e) = self.auth.logout_all(token.as_ref()).await {
            warn!(error = %e, "logout-all request failed, clearing local session anyway");
        }
        self.store().clear().await;
        info!("logged out of all sessions");
        Ok(())
    }

    /// Fetch the current user through the authenticated transport and cache it.
    pub async fn profile(&self) -> Result<User> {
        let user = self
            .transport
            .get(PROFILE_PATH)
            .await?
            .error_for_status()?
            .json::<ProfileBody>()?
            .into_user();
        self.store().set_user(user.clone()).await;
        Ok(user)
    }

    /// Recover a session at startup.
    ///
    /// A mirrored credential is only trusted after the profile call accepts
    /// it. Without a usable credential one renewal is attempted. An invalid
    /// session resolves to `Ok(None)`; network failures are still errors.
    pub async fn restore(&self) -> Result<Option<User>> {
        match self.store().restore_from_mirror().await {
            Ok(true) => debug!("validating mirrored credential"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable credential mirror"),
        }

        if self.store().get().await.is_none() {
            debug!("no usable credential, attempting renewal");
            if let Err(refresh::Error::SessionInvalid(reason)) =
                self.transport.coordinator().request_refresh().await
            {
                info!(%reason, "no session to restore");
                return Ok(None);
            }
        }

        match self.profile().await {
            Ok(user) => {
                info!("session restored");
                Ok(Some(user))
            }
            Err(Error::SessionInvalid(reason)) => {
                info!(%reason, "restored session rejected");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
