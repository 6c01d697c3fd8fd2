use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::orchestrator::AuthResult;
use super::params::{OAuthParams, TransportRequest};

// the seams. swap the memory store for a real db and nothing upstream notices

/// A registered client application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    pub key: String,
    pub secret: String,
    /// RSA key (PEM) for RSA-SHA1. A public key is enough to verify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsa_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Consumer {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            rsa_key: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestToken {
    pub key: String,
    pub secret: String,
    pub consumer_key: String,
    /// `oob` when the consumer cannot receive redirects
    pub callback: String,
    pub userid: Option<String>,
    pub verifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub valid_till: Option<DateTime<Utc>>,
}

impl RequestToken {
    pub fn is_authorized(&self) -> bool {
        self.userid.is_some() && self.verifier.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub key: String,
    pub secret: String,
    pub consumer_key: String,
    pub userid: String,
    pub created_at: DateTime<Utc>,
    pub valid_till: Option<DateTime<Utc>>,
}

/// Expired tokens are handled as if they did not exist
pub(crate) fn is_live(valid_till: Option<DateTime<Utc>>) -> bool {
    valid_till.is_none_or(|till| till > Utc::now())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token not found")]
    NotFound,
    #[error("token already authorized")]
    AlreadyAuthorized,
    #[error("request token has no authorized user")]
    NotAuthorized,
    #[error("verifier mismatch")]
    VerifierMismatch,
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
}

/// Persistence for consumers and tokens.
///
/// Lookups surface "not found" as `None`. The mutating calls must be atomic
/// per token key: two concurrent exchanges of the same request token can
/// never both succeed.
#[async_trait]
pub trait TokenStore {
    async fn get_consumer_by_key(&self, key: &str) -> Result<Option<Consumer>, StoreError>;

    async fn get_request_token(&self, key: &str) -> Result<Option<RequestToken>, StoreError>;

    /// Only returns the token when it was issued to `consumer_key`
    async fn get_access_token(
        &self,
        key: &str,
        consumer_key: &str,
    ) -> Result<Option<AccessToken>, StoreError>;

    async fn create_request_token(&self, token: RequestToken) -> Result<RequestToken, StoreError>;

    /// Binds `userid` and `verifier` to an unauthorized request token
    async fn set_request_token_user(
        &self,
        key: &str,
        userid: &str,
        verifier: &str,
    ) -> Result<RequestToken, StoreError>;

    /// Consumes the request token `request_key` (which must carry `verifier`
    /// and a bound user) and stores `token` in the same step.
    async fn create_access_token(
        &self,
        request_key: &str,
        verifier: &str,
        token: AccessToken,
    ) -> Result<AccessToken, StoreError>;
}

/// A signature algorithm, looked up by its `oauth_signature_method` name
pub trait SignatureMethod {
    fn name(&self) -> &'static str;

    fn sign(
        &self,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
    ) -> Result<String, super::signature::SignatureError>;

    fn verify(
        &self,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
        signature: &str,
    ) -> bool;
}

/// What the host middleware needs from an authentication plugin
#[async_trait]
pub trait HostPlugin {
    /// Extract credentials, `None` when the request carries none
    fn identify(&self, request: &TransportRequest) -> Option<OAuthParams>;

    async fn authenticate(&self, request: &TransportRequest, params: &OAuthParams) -> AuthResult;

    /// Value for the `WWW-Authenticate` header of a 401
    fn challenge(&self) -> String;
}

