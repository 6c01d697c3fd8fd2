mod authorize;
mod classify;
mod manager;
mod middleware;
mod orchestrator;
mod params;
mod plugin;
mod predicates;
mod signature;
mod store;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use authorize::{authorize_decision_handler, authorize_page_handler};
pub use middleware::{challenge_response, oauth_middleware};
pub use orchestrator::Identity;
pub use predicates::{is_consumer, is_oauth_user, not_oauth};
pub use store::MemoryTokenStore;
pub use traits::{Consumer, HostPlugin, TokenStore};

use axum::http::HeaderName;
use classify::TokenPaths;
use manager::TokenManager;
use orchestrator::Authenticator;
use plugin::OAuthPlugin;
use signature::{HMAC_SHA1, RSA_SHA1, SignatureError, SignatureMethods};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be an absolute path, got {value:?}")]
    InvalidPath { name: &'static str, value: String },
    #[error("unknown signature method: {0}")]
    UnknownSignatureMethod(String),
    #[error("at least one signature method must be enabled")]
    NoSignatureMethods,
    #[error("invalid user header name: {0:?}")]
    InvalidUserHeader(String),
    #[error("public url must be an http(s) origin, got {0:?}")]
    InvalidPublicUrl(String),
}

/// Configuration for the OAuth provider
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Shown in the `WWW-Authenticate` challenge
    pub realm: String,
    pub request_token_path: String,
    pub access_token_path: String,
    pub authorize_path: String,
    pub signature_methods: Vec<String>,
    /// Accepted clock skew for `oauth_timestamp`, `None` to skip the check
    pub timestamp_threshold: Option<Duration>,
    pub request_token_ttl: Option<Duration>,
    pub access_token_ttl: Option<Duration>,
    /// Header the fronting login layer sets to the signed-in user
    pub user_header: String,
    /// Origin clients address us by (e.g. https://api.example.com).
    /// If not set, the Host header is trusted.
    pub public_url: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        let paths = TokenPaths::default();
        Self {
            realm: String::new(),
            request_token_path: paths.request_token,
            access_token_path: paths.access_token,
            authorize_path: "/oauth/authorize".to_string(),
            signature_methods: vec![HMAC_SHA1.to_string(), RSA_SHA1.to_string()],
            timestamp_threshold: Some(Duration::from_secs(300)),
            request_token_ttl: Some(Duration::from_secs(600)),
            access_token_ttl: None,
            user_header: "x-remote-user".to_string(),
            public_url: None,
        }
    }
}

impl OAuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("request_token_path", &self.request_token_path),
            ("access_token_path", &self.access_token_path),
            ("authorize_path", &self.authorize_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    name,
                    value: value.clone(),
                });
            }
        }
        if self.signature_methods.is_empty() {
            return Err(ConfigError::NoSignatureMethods);
        }
        if let Some(public_url) = &self.public_url {
            let valid = url::Url::parse(public_url)
                .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.path() == "/");
            if !valid {
                return Err(ConfigError::InvalidPublicUrl(public_url.clone()));
            }
        }
        Ok(())
    }

    pub fn token_paths(&self) -> TokenPaths {
        TokenPaths {
            request_token: self.request_token_path.clone(),
            access_token: self.access_token_path.clone(),
        }
    }
}

/// Complete OAuth service: configuration, token lifecycle and the host plugin
pub struct OAuthService {
    config: OAuthConfig,
    tokens: TokenManager,
    plugin: OAuthPlugin,
    user_header: HeaderName,
}

impl OAuthService {
    pub fn new(
        config: OAuthConfig,
        store: Arc<dyn TokenStore + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let methods = SignatureMethods::from_names(&config.signature_methods).map_err(|e| match e {
            SignatureError::UnsupportedMethod(name) => ConfigError::UnknownSignatureMethod(name),
            other => ConfigError::UnknownSignatureMethod(other.to_string()),
        })?;
        tracing::info!("Enabled signature methods: {}", methods.names().join(", "));
        #[cfg(not(feature = "rsa-sha1"))]
        if methods.names().contains(&RSA_SHA1) {
            tracing::warn!(
                "{} is enabled but this build has no RSA support, such requests will be rejected",
                RSA_SHA1
            );
        }

        let user_header = HeaderName::from_bytes(config.user_header.as_bytes())
            .map_err(|_| ConfigError::InvalidUserHeader(config.user_header.clone()))?;

        let tokens = TokenManager::new(store, config.request_token_ttl, config.access_token_ttl);
        let authenticator = Authenticator::new(
            tokens.clone(),
            methods,
            config.token_paths(),
            config.timestamp_threshold,
        );
        let plugin = OAuthPlugin::new(config.realm.clone(), authenticator);

        Ok(Self {
            config,
            tokens,
            plugin,
            user_header,
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn plugin(&self) -> &OAuthPlugin {
        &self.plugin
    }

    pub fn user_header(&self) -> &HeaderName {
        &self.user_header
    }
}
