//! Bearer-authenticated requests with transparent token renewal
//!
//! Every request reads the current token from the `CredentialStore` at send
//! time. A response classified as `TokenExpired` sends the request through
//! the `RefreshCoordinator` once and resends it with the renewed token. The
//! resend is marked `Renewed`, so a second expiry cannot trigger another
//! renewal. Any other authorization failure tears the session down.

use std::sync::Arc;

use auth_client::{CredentialLookup, CredentialStore};
use common::Secret;
use refresh::RefreshCoordinator;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::classify::{AuthFailure, classify_status};
use crate::error::{Error, Result};
use crate::request::{ApiRequest, ApiResponse};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Whether a request has already been resent after a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Fresh,
    Renewed,
}

#[derive(Clone)]
pub struct AuthenticatedTransport {
    client: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedTransport {
    /// Uses the coordinator's store as the token source.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store: coordinator.store().clone(),
            coordinator,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, renewing the token at most once.
    ///
    /// Without a credential the request goes out unauthenticated. A token
    /// that lapsed locally is renewed before the first send. Statuses other
    /// than 401/403 are returned untouched.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let (mut token, mut retry) = match self.store.lookup().await {
            CredentialLookup::Valid(token) => (Some(token), RetryState::Fresh),
            CredentialLookup::Absent => (None, RetryState::Fresh),
            CredentialLookup::Lapsed => {
                debug!("access token lapsed locally, renewing before send");
                (Some(self.renew(None).await?), RetryState::Renewed)
            }
        };

        loop {
            let response = self.dispatch(&request, token.as_ref()).await?;
            let status = response.status().as_u16();
            let Some(failure) = classify_status(status, &response.text()) else {
                return Ok(response);
            };

            let reason = match (failure, retry) {
                (AuthFailure::TokenExpired, RetryState::Fresh) => {
                    debug!("access token expired upstream, renewing");
                    token = Some(self.renew(token.as_ref()).await?);
                    retry = RetryState::Renewed;
                    continue;
                }
                (AuthFailure::TokenExpired, RetryState::Renewed) => "expired_after_renewal",
                (failure, _) => failure.label(),
            };

            warn!(status, reason, "authorization refused");
            self.coordinator.invalidate(reason).await;
            return Err(Error::SessionInvalid(format!(
                "{} {} refused with {status} ({reason})",
                request.method, request.path
            )));
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse> {
        let body = encode_body(path, body)?;
        self.send(ApiRequest::post(path).with_json(body)).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse> {
        let body = encode_body(path, body)?;
        self.send(ApiRequest::put(path).with_json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Obtain a token to replace `rejected`.
    ///
    /// If the store already holds a different valid token, another request
    /// renewed it in the meantime and it is reused without a new renewal.
    async fn renew(&self, rejected: Option<&Secret<String>>) -> Result<Secret<String>> {
        if let Some(current) = self.store.get().await
            && Some(&current) != rejected
        {
            debug!("reusing token renewed by a concurrent request");
            return Ok(current);
        }
        Ok(self.coordinator.request_refresh().await?)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&Secret<String>>,
    ) -> Result<ApiResponse> {
        let target = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            normalize_path(&request.path)
        );
        let mut url = reqwest::Url::parse(&target)
            .map_err(|e| Error::InvalidRequest(format!("invalid url {target}: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers)
            .header(REQUEST_ID_HEADER, request_id());
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::Transport(format!("{} {} failed: {e}", request.method, request.path))
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            Error::Transport(format!("reading {} response: {e}", request.path))
        })?;

        debug!(status = status.as_u16(), bytes = body.len(), "api responded");
        Ok(ApiResponse::new(status, headers, body))
    }
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

fn encode_body<T: Serialize + ?Sized>(path: &str, body: &T) -> Result<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|e| Error::InvalidRequest(format!("encoding body for {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_client::{AuthClient, build_http_client};
    use axum::extract::{RawQuery, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// API and auth endpoints in one server. `valid` is the only token the
    /// API accepts; any other bearer token is reported as expired, except
    /// `revoked`.
    #[derive(Clone)]
    struct MockApi {
        valid: Arc<Mutex<String>>,
        renewed: &'static str,
        refresh_fails: bool,
        gated: bool,
        gate: Arc<Notify>,
        refreshes: Arc<AtomicUsize>,
    }

    impl MockApi {
        fn new(valid: &str, renewed: &'static str) -> Self {
            Self {
                valid: Arc::new(Mutex::new(valid.to_string())),
                renewed,
                refresh_fails: false,
                gated: false,
                gate: Arc::new(Notify::new()),
                refreshes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn gated(mut self) -> Self {
            self.gated = true;
            self
        }

        fn failing(mut self) -> Self {
            self.refresh_fails = true;
            self
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    fn bearer(headers: &HeaderMap) -> Option<String> {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    }

    fn rejection(status: StatusCode, code: &str) -> Response {
        (status, Json(json!({"success": false, "code": code}))).into_response()
    }

    async fn items(State(api): State<MockApi>, headers: HeaderMap) -> Response {
        let valid = api.valid.lock().unwrap().clone();
        match bearer(&headers) {
            None => rejection(StatusCode::UNAUTHORIZED, "NO_TOKEN"),
            Some(token) if token == valid => Json(json!({"token": token})).into_response(),
            Some(token) if token == "revoked" => {
                rejection(StatusCode::UNAUTHORIZED, "INVALID_TOKEN")
            }
            Some(_) => rejection(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
        }
    }

    async fn public(headers: HeaderMap) -> Json<Value> {
        Json(json!({"authenticated": headers.contains_key(AUTHORIZATION)}))
    }

    async fn always_expired() -> Response {
        rejection(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED")
    }

    async fn forbidden() -> Response {
        rejection(StatusCode::FORBIDDEN, "ADMIN_ONLY")
    }

    async fn boom() -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response()
    }

    async fn echo(headers: HeaderMap, RawQuery(query): RawQuery, Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "request_id": headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
            "query": query,
            "body": body,
        }))
    }

    async fn refresh_token(State(api): State<MockApi>) -> Response {
        api.refreshes.fetch_add(1, Ordering::SeqCst);
        if api.gated {
            api.gate.notified().await;
        }
        if api.refresh_fails {
            return rejection(StatusCode::UNAUTHORIZED, "INVALID_REFRESH_TOKEN");
        }
        *api.valid.lock().unwrap() = api.renewed.to_string();
        Json(json!({"accessToken": api.renewed, "expiresIn": 900})).into_response()
    }

    async fn spawn_api(api: MockApi) -> String {
        let app = Router::new()
            .route("/api/items", get(items))
            .route("/api/public", get(public))
            .route("/api/always-expired", get(always_expired))
            .route("/api/forbidden", get(forbidden))
            .route("/api/boom", get(boom))
            .route("/api/echo", post(echo))
            .route("/api/auth/refresh", post(refresh_token))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/api")
    }

    fn transport_for(base_url: &str, store: Arc<CredentialStore>) -> AuthenticatedTransport {
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let auth = AuthClient::new(http.clone(), base_url);
        let coordinator = RefreshCoordinator::new(store, Arc::new(auth));
        AuthenticatedTransport::new(http, base_url, coordinator)
    }

    async fn store_with(token: &str) -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::new());
        store.set(Secret::from(token), 900).await;
        store
    }

    async fn wait_for_waiters(transport: &AuthenticatedTransport, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.coordinator().pending_waiters() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callers never joined the renewal");
    }

    fn spawn_gets(
        transport: &AuthenticatedTransport,
        path: &'static str,
        count: usize,
    ) -> Vec<tokio::task::JoinHandle<Result<ApiResponse>>> {
        (0..count)
            .map(|_| {
                let transport = transport.clone();
                tokio::spawn(async move { transport.get(path).await })
            })
            .collect()
    }

    #[tokio::test]
    async fn attaches_current_token() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api.clone()).await;
        let transport = transport_for(&base, store_with("A").await);

        let response = transport.get("/items").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().unwrap()["token"], "A");
        assert_eq!(api.refreshes(), 0);
    }

    #[tokio::test]
    async fn sends_unauthenticated_without_credential() {
        let base = spawn_api(MockApi::new("A", "B")).await;
        let transport = transport_for(&base, Arc::new(CredentialStore::new()));

        let response = transport.get("public").await.unwrap();
        assert_eq!(response.json::<Value>().unwrap()["authenticated"], false);
        assert_eq!(transport.coordinator().refresh_calls(), 0);
    }

    #[tokio::test]
    async fn forwards_body_query_and_request_id() {
        let base = spawn_api(MockApi::new("A", "B")).await;
        let transport = transport_for(&base, store_with("A").await);

        let request = ApiRequest::post("/echo")
            .with_query("page", "2")
            .with_json(json!({"crop": "tomato"}));
        let body: Value = transport.send(request).await.unwrap().json().unwrap();

        assert_eq!(body["query"], "page=2");
        assert_eq!(body["body"]["crop"], "tomato");
        assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn caller_authorization_header_is_replaced() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api).await;
        let transport = transport_for(&base, store_with("A").await);

        let request = ApiRequest::get("/items")
            .with_header("authorization", "Bearer forged")
            .unwrap();
        let body: Value = transport.send(request).await.unwrap().json().unwrap();
        assert_eq!(body["token"], "A");
    }

    #[tokio::test]
    async fn expired_token_is_renewed_and_request_resent() {
        // server already rotated to B, so A is reported as expired
        let api = MockApi::new("B", "B");
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        let response = transport.get("/items").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().unwrap()["token"], "B");
        assert_eq!(api.refreshes(), 1);
        assert_eq!(store.get().await, Some(Secret::from("B")));
    }

    #[tokio::test]
    async fn concurrent_expired_requests_share_one_renewal() {
        let api = MockApi::new("stale", "B").gated();
        let base = spawn_api(api.clone()).await;
        let transport = transport_for(&base, store_with("A").await);

        let handles = spawn_gets(&transport, "/items", 3);
        wait_for_waiters(&transport, 3).await;
        api.gate.notify_one();

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.json::<Value>().unwrap()["token"], "B");
        }
        assert_eq!(api.refreshes(), 1);
        assert_eq!(transport.coordinator().refresh_calls(), 1);
    }

    #[tokio::test]
    async fn locally_lapsed_token_renews_once_for_concurrent_requests() {
        let api = MockApi::new("A", "B").gated();
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(901)).await;
        tokio::time::resume();
        assert_eq!(store.lookup().await, CredentialLookup::Lapsed);

        let handles = spawn_gets(&transport, "/items", 3);
        wait_for_waiters(&transport, 3).await;
        api.gate.notify_one();

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.json::<Value>().unwrap()["token"], "B");
        }
        assert_eq!(api.refreshes(), 1);
        assert_eq!(store.get().await, Some(Secret::from("B")));
    }

    #[tokio::test]
    async fn failed_renewal_invalidates_every_caller() {
        let api = MockApi::new("stale", "B").gated().failing();
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        let handles = spawn_gets(&transport, "/items", 3);
        wait_for_waiters(&transport, 3).await;
        api.gate.notify_one();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_session_invalid(), "got: {err:?}");
        }
        assert_eq!(api.refreshes(), 1);
        assert_eq!(store.lookup().await, CredentialLookup::Absent);
    }

    #[tokio::test]
    async fn second_expiry_after_renewal_is_terminal() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        let err = transport.get("/always-expired").await.unwrap_err();
        assert!(err.is_session_invalid(), "got: {err:?}");
        assert_eq!(api.refreshes(), 1);
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn revoked_token_invalidates_without_renewal() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api.clone()).await;
        let store = store_with("revoked").await;
        let transport = transport_for(&base, store.clone());

        let err = transport.get("/items").await.unwrap_err();
        assert!(err.is_session_invalid(), "got: {err:?}");
        assert_eq!(api.refreshes(), 0);
        assert_eq!(store.lookup().await, CredentialLookup::Absent);
    }

    #[tokio::test]
    async fn forbidden_invalidates_without_renewal() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        let err = transport.get("/forbidden").await.unwrap_err();
        assert!(err.is_session_invalid(), "got: {err:?}");
        assert_eq!(api.refreshes(), 0);
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn server_errors_pass_through_untouched() {
        let api = MockApi::new("A", "B");
        let base = spawn_api(api.clone()).await;
        let store = store_with("A").await;
        let transport = transport_for(&base, store.clone());

        let response = transport.get("/boom").await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "database unavailable");
        assert_eq!(api.refreshes(), 0);
        assert_eq!(store.get().await, Some(Secret::from("A")));

        let err = response.error_for_status().unwrap_err();
        assert!(matches!(err, Error::Status { status: 500, .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn missing_route_passes_through() {
        let base = spawn_api(MockApi::new("A", "B")).await;
        let transport = transport_for(&base, store_with("A").await);

        let response = transport.delete("/nowhere").await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn network_failure_is_transport_error() {
        let store = store_with("A").await;
        let transport = transport_for("http://127.0.0.1:1/api", store.clone());

        let err = transport.get("/items").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
        assert_eq!(transport.coordinator().refresh_calls(), 0);
        assert_eq!(store.get().await, Some(Secret::from("A")));
    }

    #[tokio::test]
    async fn renew_reuses_token_stored_by_another_request() {
        let store = store_with("B").await;
        let transport = transport_for("http://127.0.0.1:1/api", store);

        let token = transport.renew(Some(&Secret::from("A"))).await.unwrap();
        assert_eq!(token, Secret::from("B"));
        assert_eq!(transport.coordinator().refresh_calls(), 0);
    }
}
