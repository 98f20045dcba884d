pub mod tokens;

use std::sync::Arc;

use serde_json::{Value, json};

pub use tokens::{APP_ACCESS_TOKEN, APP_REFRESH_TOKEN, AuthTokenPair, TokenStore};

use crate::gateway::{
    ApiResponse, GatewayHooks, GatewayOptions, REFRESH_TOKEN_PATH, RequestGateway, Transport,
};

pub const LOGIN_PATH: &str = "v1/auth/login";
pub const LOGOUT_PATH: &str = "v1/auth/logout";

/// Login, logout and token refresh against the auth endpoints.
///
/// `client` takes part in the refresh flow; `public_client` never does, so a
/// failed login or logout cannot trigger a refresh.
#[derive(Clone)]
pub struct AuthService {
    client: RequestGateway,
    public_client: RequestGateway,
}

impl AuthService {
    pub fn new(client: RequestGateway, public_client: RequestGateway) -> Self {
        Self {
            client,
            public_client,
        }
    }

    /// Build both clients over one transport and one token store.
    pub fn with_transport(
        options: GatewayOptions,
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
        hooks: Arc<dyn GatewayHooks>,
    ) -> Self {
        let public_options = options.clone().with_refresh_participation(false);
        let client = RequestGateway::new(
            options.with_refresh_participation(true),
            transport.clone(),
            tokens.clone(),
            hooks.clone(),
        );
        let public_client = RequestGateway::new(public_options, transport, tokens, hooks);
        Self::new(client, public_client)
    }

    /// The refresh-participating client, for authenticated API calls.
    pub fn client(&self) -> &RequestGateway {
        &self.client
    }

    pub fn tokens(&self) -> &TokenStore {
        self.client.tokens()
    }

    #[tracing::instrument(level = "debug", skip(self, payload))]
    pub async fn login(&self, payload: Value) -> ApiResponse {
        let resp = self.public_client.post(LOGIN_PATH, payload).await;
        if !resp.success {
            return resp;
        }
        match AuthTokenPair::from_payload(&resp.data) {
            Some(pair) => {
                if let Err(e) = self.tokens().set_pair(&pair).await {
                    tracing::error!(error = %e, "failed to store tokens after login");
                } else {
                    tracing::info!("logged in");
                }
            }
            None => tracing::warn!("login response carried no token pair"),
        }
        resp
    }

    /// Tell the backend to drop the session, then forget the tokens locally
    /// whatever it answered.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn logout(&self, logout_all: bool) -> ApiResponse {
        let refresh_token = self.tokens().refresh_token().await;
        let resp = self
            .public_client
            .post(
                LOGOUT_PATH,
                json!({ "refresh_token": refresh_token, "logout_all": logout_all }),
            )
            .await;
        self.tokens().clear().await;
        tracing::info!(remote_ok = resp.success, "logged out");
        resp
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh_token(&self) -> ApiResponse {
        let refresh_token = self.tokens().refresh_token().await;
        let resp = self
            .client
            .post(REFRESH_TOKEN_PATH, json!({ "refreshToken": refresh_token }))
            .await;
        if resp.success {
            if let Some(access) = resp.data.get("accessToken").and_then(Value::as_str) {
                if let Err(e) = self.tokens().set_access_token(access).await {
                    tracing::error!(error = %e, "failed to store refreshed access token");
                }
            }
        }
        resp
    }
}
