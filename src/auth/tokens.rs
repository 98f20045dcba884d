use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{KeyValueStore, StoreError};

pub const APP_ACCESS_TOKEN: &str = "app_access_token";
pub const APP_REFRESH_TOKEN: &str = "app_refresh_token";

/// Access and refresh credential. Both are opaque; expiry is only ever
/// discovered through a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthTokenPair {
    /// Pull a token pair out of a login payload. Accepts both camelCase and
    /// snake_case field names.
    pub fn from_payload(data: &Value) -> Option<Self> {
        let field = |camel: &str, snake: &str| {
            data.get(camel)
                .or_else(|| data.get(snake))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(AuthTokenPair {
            access_token: field("accessToken", "access_token")?,
            refresh_token: field("refreshToken", "refresh_token")?,
        })
    }
}

/// Token pair persisted under fixed keys of a `KeyValueStore`.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.read(APP_ACCESS_TOKEN).await
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.read(APP_REFRESH_TOKEN).await
    }

    /// True when neither token is stored.
    pub async fn is_empty(&self) -> bool {
        self.access_token().await.is_none() && self.refresh_token().await.is_none()
    }

    pub async fn set_pair(&self, pair: &AuthTokenPair) -> Result<(), StoreError> {
        self.kv.set(APP_ACCESS_TOKEN, &pair.access_token).await?;
        self.kv.set(APP_REFRESH_TOKEN, &pair.refresh_token).await?;
        Ok(())
    }

    pub async fn set_access_token(&self, token: &str) -> Result<(), StoreError> {
        self.kv.set(APP_ACCESS_TOKEN, token).await
    }

    pub async fn set_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        self.kv.set(APP_REFRESH_TOKEN, token).await
    }

    /// Drop both tokens. Failures are logged; a half-cleared pair is still
    /// unusable once the refresh token is gone.
    pub async fn clear(&self) {
        for key in [APP_REFRESH_TOKEN, APP_ACCESS_TOKEN] {
            if let Err(e) = self.kv.remove(key).await {
                tracing::error!(%key, error = %e, "failed to remove token");
            }
        }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(v) => v.filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::error!(%key, error = %e, "failed to read token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryKvStore;

    #[tokio::test]
    async fn set_and_clear_pair() {
        let kv = Arc::new(MemoryKvStore::new());
        let tokens = TokenStore::new(kv.clone());
        assert!(tokens.is_empty().await);

        tokens
            .set_pair(&AuthTokenPair {
                access_token: "a".into(),
                refresh_token: "r".into(),
            })
            .await
            .unwrap();
        assert_eq!(kv.get(APP_ACCESS_TOKEN).await.unwrap().as_deref(), Some("a"));
        assert_eq!(tokens.refresh_token().await.as_deref(), Some("r"));
        assert!(!tokens.is_empty().await);

        tokens.clear().await;
        assert!(tokens.is_empty().await);
    }

    #[test]
    fn pair_from_either_casing() {
        let camel = json!({ "accessToken": "a1", "refreshToken": "r1" });
        let snake = json!({ "access_token": "a2", "refresh_token": "r2" });
        assert_eq!(
            AuthTokenPair::from_payload(&camel).unwrap().access_token,
            "a1"
        );
        assert_eq!(
            AuthTokenPair::from_payload(&snake).unwrap().refresh_token,
            "r2"
        );
        assert!(AuthTokenPair::from_payload(&json!({ "accessToken": "a" })).is_none());
        assert!(AuthTokenPair::from_payload(&json!(null)).is_none());
    }
}
