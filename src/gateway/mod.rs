//! Request gateway: bearer auth, bounded timeouts, and transparent recovery
//! from an expired access token.
//!
//! A 401 makes the gateway refresh the access token and replay the request
//! once. Only one refresh runs at a time per gateway; callers that hit a 401
//! meanwhile wait for that refresh and share its outcome.

pub mod hooks;
pub mod transport;


use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::auth::TokenStore;
pub use hooks::{GatewayHooks, TracingHooks};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError, TransportRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const REFRESH_TOKEN_PATH: &str = "v1/auth/refresh-token";
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub base_url: String,
    pub timeout: Duration,
    /// Unwrap the backend envelope into `ApiResponse::data`.
    pub transform_response: bool,
    /// Take part in the refresh-and-replay flow on 401.
    pub refresh_participation: bool,
    pub refresh_path: String,
    /// Ask the host to show the login route after a forced logout.
    pub redirect_on_logout: bool,
}

impl GatewayOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        GatewayOptions {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            transform_response: true,
            refresh_participation: true,
            refresh_path: REFRESH_TOKEN_PATH.to_string(),
            redirect_on_logout: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transform_response(mut self, transform: bool) -> Self {
        self.transform_response = transform;
        self
    }

    pub fn with_refresh_participation(mut self, participate: bool) -> Self {
        self.refresh_participation = participate;
        self
    }

    pub fn with_redirect_on_logout(mut self, redirect: bool) -> Self {
        self.redirect_on_logout = redirect;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Suppress the failure notification for this call.
    pub off_notify: bool,
    /// Never refresh on 401 for this call.
    pub off_refresh_token: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            body: None,
            off_notify: false,
            off_refresh_token: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn without_notify(mut self) -> Self {
        self.off_notify = true;
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.off_refresh_token = true;
        self
    }
}

/// Normalized outcome of a gateway call. Failures are values, never panics
/// or errors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiResponse {
    pub success: bool,
    pub error: bool,
    pub data: Value,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub raw_response: Option<RawResponse>,
    /// Why no response arrived (transport error or timeout); `None` whenever
    /// the backend answered.
    pub cause: Option<String>,
}

impl ApiResponse {
    fn network_error(cause: String) -> Self {
        ApiResponse {
            success: false,
            error: true,
            data: Value::Null,
            status_code: None,
            message: Some(NETWORK_ERROR_MESSAGE.to_string()),
            raw_response: None,
            cause: Some(cause),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("refresh request failed: {0}")]
    Transport(String),
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16, message: Option<String> },
    #[error("refresh response carried no access token")]
    MissingAccessToken,
    #[error("failed to store refreshed token: {0}")]
    Persist(String),
    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// A caller parked behind the in-flight refresh. Settled exactly once.
struct PendingRefreshRequest {
    sender: oneshot::Sender<Result<(), RefreshError>>,
}

impl PendingRefreshRequest {
    fn settle(self, outcome: Result<(), RefreshError>) {
        // the waiter may have been dropped (caller cancelled); nothing to do then
        let _ = self.sender.send(outcome);
    }
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: Vec<PendingRefreshRequest>,
}

/// Held by the caller performing the refresh. Releases every queued caller
/// with the outcome, or with `Abandoned` if dropped before `release`.
struct InFlightRefresh<'a> {
    state: &'a Mutex<RefreshState>,
    released: bool,
}

impl InFlightRefresh<'_> {
    fn release(mut self, outcome: &Result<(), RefreshError>) {
        self.released = true;
        settle_queue(self.state, outcome);
    }
}

impl Drop for InFlightRefresh<'_> {
    fn drop(&mut self) {
        if !self.released {
            settle_queue(self.state, &Err(RefreshError::Abandoned));
        }
    }
}

fn lock_state(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn settle_queue(state: &Mutex<RefreshState>, outcome: &Result<(), RefreshError>) {
    let queue = {
        let mut state = lock_state(state);
        state.in_flight = false;
        mem::take(&mut state.queue)
    };
    tracing::debug!(waiters = queue.len(), ok = outcome.is_ok(), "releasing refresh waiters");
    for pending in queue {
        pending.settle(outcome.clone());
    }
}

struct GatewayInner {
    options: GatewayOptions,
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    hooks: Arc<dyn GatewayHooks>,
    refresh: Mutex<RefreshState>,
}

/// Cheap to clone; clones share tokens and refresh state.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

impl RequestGateway {
    pub fn new(
        options: GatewayOptions,
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
        hooks: Arc<dyn GatewayHooks>,
    ) -> Self {
        tracing::debug!(
            base_url = %options.base_url,
            refresh = options.refresh_participation,
            "creating RequestGateway"
        );
        RequestGateway {
            inner: Arc::new(GatewayInner {
                options,
                transport,
                tokens,
                hooks,
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub async fn get(&self, path: &str) -> ApiResponse {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> ApiResponse {
        self.request(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> ApiResponse {
        self.request(ApiRequest::new(Method::PUT, path).with_body(body))
            .await
    }

    pub async fn patch(&self, path: &str, body: Value) -> ApiResponse {
        self.request(ApiRequest::new(Method::PATCH, path).with_body(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> ApiResponse {
        self.request(ApiRequest::new(Method::DELETE, path)).await
    }

    /// Issue `request`, refreshing and replaying once on 401.
    #[tracing::instrument(
        level = "debug",
        skip(self, request),
        fields(method = %request.method, path = %request.path, request_id = %Uuid::new_v4())
    )]
    pub async fn request(&self, mut request: ApiRequest) -> ApiResponse {
        loop {
            let raw = match self.dispatch(&request).await {
                Ok(raw) => raw,
                Err(reason) => {
                    tracing::warn!(%reason, "request did not complete");
                    let response = ApiResponse::network_error(reason);
                    self.notify_failure(&request, &response);
                    return response;
                }
            };

            if is_success(raw.status) {
                return self.normalize(raw);
            }

            if raw.status == 401 && self.participates(&request) {
                match self.recover_unauthorized(&request, &raw).await {
                    Ok(()) => {
                        tracing::debug!("replaying request with refreshed token");
                        request.retried = true;
                        continue;
                    }
                    Err(response) => return response,
                }
            }

            let response = self.normalize(raw);
            tracing::debug!(status = ?response.status_code, "request failed");
            self.notify_failure(&request, &response);
            return response;
        }
    }

    fn participates(&self, request: &ApiRequest) -> bool {
        self.inner.options.refresh_participation && !request.off_refresh_token
    }

    /// `Ok(())` means the token was refreshed and the request may be replayed.
    async fn recover_unauthorized(
        &self,
        request: &ApiRequest,
        raw: &RawResponse,
    ) -> Result<(), ApiResponse> {
        if request.retried {
            tracing::warn!("still unauthorized after refresh, logging out");
            self.logout().await;
            return Err(self.unauthorized(raw, None));
        }
        if self.is_refresh_endpoint(&request.path) {
            tracing::warn!("refresh endpoint rejected the session, logging out");
            self.logout().await;
            return Err(self.unauthorized(raw, None));
        }

        let waiter = {
            let mut state = lock_state(&self.inner.refresh);
            if state.in_flight {
                let (sender, receiver) = oneshot::channel();
                state.queue.push(PendingRefreshRequest { sender });
                Some(receiver)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(receiver) = waiter {
            tracing::debug!("refresh already in flight, waiting");
            let outcome = receiver.await.unwrap_or(Err(RefreshError::Abandoned));
            return outcome.map_err(|e| self.unauthorized(raw, Some(&e)));
        }

        let guard = InFlightRefresh {
            state: &self.inner.refresh,
            released: false,
        };
        let outcome = self.refresh_access_token().await;
        guard.release(&outcome);

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, logging out");
                self.logout().await;
                Err(self.unauthorized(raw, Some(&e)))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn refresh_access_token(&self) -> Result<(), RefreshError> {
        let tokens = &self.inner.tokens;
        let refresh_token = tokens
            .refresh_token()
            .await
            .ok_or(RefreshError::NoRefreshToken)?;

        let request = ApiRequest::post(
            self.inner.options.refresh_path.clone(),
            json!({ "refreshToken": refresh_token }),
        )
        .without_refresh()
        .without_notify();
        let raw = self
            .dispatch(&request)
            .await
            .map_err(RefreshError::Transport)?;

        let body: Value = serde_json::from_str(&raw.body).unwrap_or(Value::Null);
        let declined = body.get("success").and_then(Value::as_bool) == Some(false);
        if !is_success(raw.status) || declined {
            return Err(RefreshError::Rejected {
                status: raw.status,
                message: envelope_message(&body),
            });
        }

        let access_token = body
            .pointer("/data/accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingAccessToken)?;
        tokens
            .set_access_token(access_token)
            .await
            .map_err(|e| RefreshError::Persist(e.to_string()))?;
        if let Some(rotated) = body.pointer("/data/refreshToken").and_then(Value::as_str) {
            tokens
                .set_refresh_token(rotated)
                .await
                .map_err(|e| RefreshError::Persist(e.to_string()))?;
        }
        tracing::info!("access token refreshed");
        Ok(())
    }

    async fn logout(&self) {
        self.inner.tokens.clear().await;
        if self.inner.options.redirect_on_logout {
            let hooks = &self.inner.hooks;
            let location = hooks.current_location();
            hooks.redirect_to_login(location.as_deref());
        }
    }

    /// Single transport attempt with the current token and the timeout applied.
    /// `Err` carries a description of why no response arrived.
    async fn dispatch(&self, request: &ApiRequest) -> Result<RawResponse, String> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(token) = self.inner.tokens.access_token().await {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        let outgoing = TransportRequest {
            method: request.method.clone(),
            url: self.url(&request.path),
            headers,
            body: request.body.clone(),
        };

        let timeout = self.inner.options.timeout;
        match tokio::time::timeout(timeout, self.inner.transport.send(outgoing)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Request timeout after {}ms", timeout.as_millis())),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = &self.inner.options.base_url;
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn is_refresh_endpoint(&self, path: &str) -> bool {
        self.url(path) == self.url(&self.inner.options.refresh_path)
    }

    fn normalize(&self, raw: RawResponse) -> ApiResponse {
        let success = is_success(raw.status);
        let body: Option<Value> = serde_json::from_str(&raw.body).ok();
        let message = body.as_ref().and_then(envelope_message);
        let data = match (self.inner.options.transform_response, body) {
            (true, Some(mut body)) => body
                .get_mut("data")
                .map(Value::take)
                .unwrap_or(Value::Null),
            (true, None) => Value::Null,
            (false, Some(body)) => body,
            (false, None) => Value::String(raw.body.clone()),
        };
        ApiResponse {
            success,
            error: !success,
            data,
            status_code: Some(raw.status),
            message,
            raw_response: Some(raw),
            cause: None,
        }
    }

    fn unauthorized(&self, raw: &RawResponse, cause: Option<&RefreshError>) -> ApiResponse {
        let mut response = self.normalize(raw.clone());
        if let Some(cause) = cause {
            tracing::debug!(error = %cause, "request rejected after refresh attempt");
        }
        if response.message.is_none() {
            response.message = Some(SESSION_EXPIRED_MESSAGE.to_string());
        }
        response
    }

    fn notify_failure(&self, request: &ApiRequest, response: &ApiResponse) {
        if request.off_notify {
            return;
        }
        let message = response
            .message
            .as_deref()
            .unwrap_or(NETWORK_ERROR_MESSAGE);
        self.inner.hooks.notify(message);
    }

    #[cfg(test)]
    fn queued_refresh_waiters(&self) -> usize {
        lock_state(&self.inner.refresh).queue.len()
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn envelope_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
