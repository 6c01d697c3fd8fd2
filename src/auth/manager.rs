use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use url::Url;

use super::traits::{AccessToken, Consumer, RequestToken, StoreError, TokenStore};

pub const OUT_OF_BAND: &str = "oob";

const TOKEN_LENGTH: usize = 40;
const VERIFIER_LENGTH: usize = 6;
// lowercase only, people end up typing these in by hand
const VERIFIER_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
// key collisions at 40 alphanumerics mean something is badly wrong
const MAX_KEY_ATTEMPTS: usize = 3;

/// Result of a user authorizing a request token
#[derive(Debug, Clone)]
pub struct Authorization {
    pub verifier: String,
    /// Where to send a browser, or `oob` when the verifier must be shown instead
    pub callback_url: String,
}

/// Owns token state transitions; persistence goes through the store
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore + Send + Sync>,
    request_token_ttl: Option<Duration>,
    access_token_ttl: Option<Duration>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn TokenStore + Send + Sync>,
        request_token_ttl: Option<Duration>,
        access_token_ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            request_token_ttl,
            access_token_ttl,
        }
    }

    pub async fn get_consumer_by_key(&self, key: &str) -> Option<Consumer> {
        self.store
            .get_consumer_by_key(key)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("consumer lookup failed: {}", e);
                None
            })
    }

    pub async fn create_request_token(
        &self,
        consumer: &Consumer,
        callback: &str,
    ) -> Result<RequestToken, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = Utc::now();
            let token = RequestToken {
                key: random_string(TOKEN_LENGTH),
                secret: random_string(TOKEN_LENGTH),
                consumer_key: consumer.key.clone(),
                callback: callback.to_string(),
                userid: None,
                verifier: None,
                created_at: now,
                valid_till: expiry(now, self.request_token_ttl),
            };
            match self.store.create_request_token(token).await {
                Err(StoreError::DuplicateKey(_)) if attempt < MAX_KEY_ATTEMPTS => continue,
                other => return other,
            }
        }
    }

    pub async fn get_request_token(&self, key: &str) -> Option<RequestToken> {
        self.store.get_request_token(key).await.unwrap_or_else(|e| {
            tracing::error!("request token lookup failed: {}", e);
            None
        })
    }

    /// Bind `userid` to the request token and hand out a fresh verifier
    pub async fn authorize_request_token(
        &self,
        token_key: &str,
        userid: &str,
    ) -> Result<Authorization, StoreError> {
        let verifier = generate_verifier();
        let token = self
            .store
            .set_request_token_user(token_key, userid, &verifier)
            .await?;

        tracing::info!(
            "request token authorized by user {} for consumer {}",
            userid,
            token.consumer_key
        );

        Ok(Authorization {
            callback_url: callback_url(&token),
            verifier,
        })
    }

    /// Exchange an authorized request token. The request token is spent even
    /// if the caller never sees the access token.
    pub async fn create_access_token(
        &self,
        request_token: &RequestToken,
    ) -> Result<AccessToken, StoreError> {
        let (Some(userid), Some(verifier)) = (&request_token.userid, &request_token.verifier)
        else {
            return Err(StoreError::NotAuthorized);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = Utc::now();
            let token = AccessToken {
                key: random_string(TOKEN_LENGTH),
                secret: random_string(TOKEN_LENGTH),
                consumer_key: request_token.consumer_key.clone(),
                userid: userid.clone(),
                created_at: now,
                valid_till: expiry(now, self.access_token_ttl),
            };
            match self
                .store
                .create_access_token(&request_token.key, verifier, token)
                .await
            {
                Err(StoreError::DuplicateKey(_)) if attempt < MAX_KEY_ATTEMPTS => continue,
                other => return other,
            }
        }
    }

    /// A token issued to another consumer is reported as missing
    pub async fn get_access_token(&self, key: &str, consumer: &Consumer) -> Option<AccessToken> {
        self.store
            .get_access_token(key, &consumer.key)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("access token lookup failed: {}", e);
                None
            })
    }
}

fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_add_signed(ttl)
}

pub fn random_string(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn generate_verifier() -> String {
    let mut rng = rand::rng();
    (0..VERIFIER_LENGTH)
        .map(|_| VERIFIER_ALPHABET[rng.random_range(0..VERIFIER_ALPHABET.len())] as char)
        .collect()
}

/// The stored callback with `oauth_token` and `oauth_verifier` appended,
/// or `oob`
pub fn callback_url(token: &RequestToken) -> String {
    if token.callback.is_empty() || token.callback == OUT_OF_BAND {
        return OUT_OF_BAND.to_string();
    }
    let Ok(mut url) = Url::parse(&token.callback) else {
        tracing::warn!("stored callback for token is not a URL, falling back to oob");
        return OUT_OF_BAND.to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(k, _)| k != "oauth_token" && k != "oauth_verifier")
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(kept);
        query.append_pair("oauth_token", &token.key);
        query.append_pair("oauth_verifier", token.verifier.as_deref().unwrap_or_default());
    }
    url.to_string()
}

/// `oob`, or an absolute URL with a scheme a browser can safely follow
pub fn is_acceptable_callback(callback: &str) -> bool {
    if callback == OUT_OF_BAND {
        return true;
    }
    match Url::parse(callback) {
        // native apps get custom schemes, script-ish ones are out
        Ok(url) => !matches!(url.scheme(), "javascript" | "data" | "vbscript"),
        Err(_) => false,
    }
}
