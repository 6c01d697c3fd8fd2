use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{
    AccessToken, Consumer, RequestToken, StoreError, TokenStore, is_live,
};

/// consumers and tokens kept in memory (doesn't persist)
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    // one lock over everything so token transitions are atomic
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    consumers: HashMap<String, Consumer>,
    request_tokens: HashMap<String, RequestToken>,
    access_tokens: HashMap<String, AccessToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_consumers(consumers: impl IntoIterator<Item = Consumer>) -> Self {
        let store = Self::new();
        for consumer in consumers {
            store.add_consumer(consumer).await;
        }
        store
    }

    /// Registration itself is handled elsewhere; this only loads known consumers
    pub async fn add_consumer(&self, consumer: Consumer) {
        let mut tables = self.inner.write().await;
        tables.consumers.insert(consumer.key.clone(), consumer);
    }

    /// boot out tokens past their valid_till
    pub async fn cleanup_expired(&self) -> usize {
        let mut tables = self.inner.write().await;
        let before = tables.request_tokens.len() + tables.access_tokens.len();

        tables.request_tokens.retain(|_, t| is_live(t.valid_till));
        tables.access_tokens.retain(|_, t| is_live(t.valid_till));

        let removed = before - tables.request_tokens.len() - tables.access_tokens.len();
        if removed > 0 {
            tracing::debug!("cleaned up {} expired tokens", removed);
        }
        removed
    }

    /// (request tokens, access tokens) currently held, for monitoring
    pub async fn len(&self) -> (usize, usize) {
        let tables = self.inner.read().await;
        (tables.request_tokens.len(), tables.access_tokens.len())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_consumer_by_key(&self, key: &str) -> Result<Option<Consumer>, StoreError> {
        Ok(self.inner.read().await.consumers.get(key).cloned())
    }

    async fn get_request_token(&self, key: &str) -> Result<Option<RequestToken>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .request_tokens
            .get(key)
            .filter(|t| is_live(t.valid_till))
            .cloned())
    }

    async fn get_access_token(
        &self,
        key: &str,
        consumer_key: &str,
    ) -> Result<Option<AccessToken>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .access_tokens
            .get(key)
            .filter(|t| t.consumer_key == consumer_key && is_live(t.valid_till))
            .cloned())
    }

    async fn create_request_token(&self, token: RequestToken) -> Result<RequestToken, StoreError> {
        let mut tables = self.inner.write().await;
        if tables.request_tokens.contains_key(&token.key) {
            return Err(StoreError::DuplicateKey(token.key));
        }
        tables.request_tokens.insert(token.key.clone(), token.clone());
        Ok(token)
    }

    async fn set_request_token_user(
        &self,
        key: &str,
        userid: &str,
        verifier: &str,
    ) -> Result<RequestToken, StoreError> {
        let mut tables = self.inner.write().await;
        let token = tables
            .request_tokens
            .get_mut(key)
            .filter(|t| is_live(t.valid_till))
            .ok_or(StoreError::NotFound)?;
        if token.userid.is_some() {
            return Err(StoreError::AlreadyAuthorized);
        }
        token.userid = Some(userid.to_string());
        token.verifier = Some(verifier.to_string());
        Ok(token.clone())
    }

    async fn create_access_token(
        &self,
        request_key: &str,
        verifier: &str,
        token: AccessToken,
    ) -> Result<AccessToken, StoreError> {
        let mut tables = self.inner.write().await;
        let request = tables
            .request_tokens
            .get(request_key)
            .filter(|t| is_live(t.valid_till))
            .ok_or(StoreError::NotFound)?;
        if request.verifier.as_deref() != Some(verifier) {
            return Err(StoreError::VerifierMismatch);
        }
        if request.userid.as_deref() != Some(token.userid.as_str())
            || request.consumer_key != token.consumer_key
        {
            return Err(StoreError::NotAuthorized);
        }
        if tables.access_tokens.contains_key(&token.key) {
            return Err(StoreError::DuplicateKey(token.key));
        }

        // spent
        tables.request_tokens.remove(request_key);
        tables.access_tokens.insert(token.key.clone(), token.clone());
        Ok(token)
    }
}
