use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use url::Url;

use super::params::{OAuthParams, TransportRequest, signature_params};
use super::traits::{Consumer, SignatureMethod};

type HmacSha1 = Hmac<Sha1>;

pub const HMAC_SHA1: &str = "HMAC-SHA1";
pub const RSA_SHA1: &str = "RSA-SHA1";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("unsupported signature method: {0}")]
    UnsupportedMethod(String),
    #[error("unsupported oauth_version: {0}")]
    UnsupportedVersion(String),
    #[error("timestamp outside the accepted window: {0}")]
    StaleTimestamp(String),
    #[error("consumer {0} has no usable RSA key")]
    MissingKey(String),
    #[error("signing failed: {0}")]
    Crypto(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// RFC 5849 percent-encoding (unreserved characters pass, uppercase hex)
pub fn percent_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Scheme, host, non-default port and path. No query, no fragment.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    // Url already hides the scheme's default port
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(url.path());
    normalized
}

/// Encoded `key=value` pairs sorted by key then value, joined with `&`
pub fn normalize_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut encoded: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| *k != "oauth_signature")
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// The signature base string. Query parameters of `url` are folded into the
/// parameter list.
pub fn signing_base(method: &str, url: &Url, params: &[(String, String)]) -> String {
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let all = query
        .iter()
        .chain(params.iter())
        .map(|(k, v)| (k.as_str(), v.as_str()));

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&normalize_url(url)),
        percent_encode(&normalize_params(all))
    )
}

pub struct HmacSha1Method;

impl HmacSha1Method {
    fn digest(
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
    ) -> Result<Vec<u8>, SignatureError> {
        let key = format!(
            "{}&{}",
            percent_encode(&consumer.secret),
            percent_encode(token_secret.unwrap_or_default())
        );
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| SignatureError::Crypto(e.to_string()))?;
        mac.update(base.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl SignatureMethod for HmacSha1Method {
    fn name(&self) -> &'static str {
        HMAC_SHA1
    }

    fn sign(
        &self,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
    ) -> Result<String, SignatureError> {
        Ok(BASE64.encode(Self::digest(base, consumer, token_secret)?))
    }

    fn verify(
        &self,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
        signature: &str,
    ) -> bool {
        let Ok(given) = BASE64.decode(signature) else {
            return false;
        };
        let Ok(expected) = Self::digest(base, consumer, token_secret) else {
            return false;
        };
        expected.ct_eq(&given).into()
    }
}

/// RSA-SHA1 with PKCS#1 v1.5 padding. Keys come from `Consumer::rsa_key`;
/// the token secret plays no part.
pub struct RsaSha1Method;

#[cfg(feature = "rsa-sha1")]
mod rsa_keys {
    use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    pub fn private_key(pem: &str) -> Option<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_pem(pem).ok())
    }

    /// Accepts a public key or derives one from a private key
    pub fn public_key(pem: &str) -> Option<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(pem)
            .ok()
            .or_else(|| RsaPublicKey::from_pkcs1_pem(pem).ok())
            .or_else(|| private_key(pem).map(|k| k.to_public_key()))
    }
}

#[cfg(feature = "rsa-sha1")]
impl SignatureMethod for RsaSha1Method {
    fn name(&self) -> &'static str {
        RSA_SHA1
    }

    fn sign(
        &self,
        base: &str,
        consumer: &Consumer,
        _token_secret: Option<&str>,
    ) -> Result<String, SignatureError> {
        use rsa::Pkcs1v15Sign;
        use sha1::Digest;

        let key = consumer
            .rsa_key
            .as_deref()
            .and_then(rsa_keys::private_key)
            .ok_or_else(|| SignatureError::MissingKey(consumer.key.clone()))?;
        let digest = Sha1::digest(base.as_bytes());
        let signature = key
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| SignatureError::Crypto(e.to_string()))?;
        Ok(BASE64.encode(signature))
    }

    fn verify(
        &self,
        base: &str,
        consumer: &Consumer,
        _token_secret: Option<&str>,
        signature: &str,
    ) -> bool {
        use rsa::Pkcs1v15Sign;
        use sha1::Digest;

        let Some(key) = consumer.rsa_key.as_deref().and_then(rsa_keys::public_key) else {
            tracing::warn!(
                "RSA-SHA1 request for consumer {} but no usable RSA key is configured",
                consumer.key
            );
            return false;
        };
        let Ok(signature) = BASE64.decode(signature) else {
            return false;
        };
        let digest = Sha1::digest(base.as_bytes());
        key.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
            .is_ok()
    }
}

#[cfg(not(feature = "rsa-sha1"))]
impl SignatureMethod for RsaSha1Method {
    fn name(&self) -> &'static str {
        RSA_SHA1
    }

    fn sign(
        &self,
        _base: &str,
        consumer: &Consumer,
        _token_secret: Option<&str>,
    ) -> Result<String, SignatureError> {
        // no RSA support compiled in, so no key is usable
        Err(SignatureError::MissingKey(consumer.key.clone()))
    }

    fn verify(
        &self,
        _base: &str,
        consumer: &Consumer,
        _token_secret: Option<&str>,
        _signature: &str,
    ) -> bool {
        tracing::warn!(
            "RSA-SHA1 request for consumer {} rejected: built without the rsa-sha1 feature",
            consumer.key
        );
        false
    }
}

/// Enabled signature methods keyed by their wire name
#[derive(Clone, Default)]
pub struct SignatureMethods {
    methods: HashMap<String, Arc<dyn SignatureMethod + Send + Sync>>,
}

impl SignatureMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin(name: &str) -> Option<Arc<dyn SignatureMethod + Send + Sync>> {
        match name {
            HMAC_SHA1 => Some(Arc::new(HmacSha1Method)),
            RSA_SHA1 => Some(Arc::new(RsaSha1Method)),
            _ => None,
        }
    }

    /// Enable the named built-in methods; unknown names are an error
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, SignatureError> {
        let mut methods = Self::new();
        for name in names {
            let name = name.as_ref().trim();
            let method = Self::builtin(name)
                .ok_or_else(|| SignatureError::UnsupportedMethod(name.to_string()))?;
            methods.register(method);
        }
        Ok(methods)
    }

    pub fn register(&mut self, method: Arc<dyn SignatureMethod + Send + Sync>) {
        self.methods.insert(method.name().to_string(), method);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[allow(dead_code)] // only clients sign
    pub fn sign(
        &self,
        method: &str,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
    ) -> Result<String, SignatureError> {
        self.methods
            .get(method)
            .ok_or_else(|| SignatureError::UnsupportedMethod(method.to_string()))?
            .sign(base, consumer, token_secret)
    }

    pub fn verify(
        &self,
        method: &str,
        base: &str,
        consumer: &Consumer,
        token_secret: Option<&str>,
        signature: &str,
    ) -> bool {
        self.methods
            .get(method)
            .is_some_and(|m| m.verify(base, consumer, token_secret, signature))
    }

    /// Check a whole signed request: protocol version, timestamp window,
    /// method and signature.
    pub fn verify_request(
        &self,
        request: &TransportRequest,
        params: &OAuthParams,
        consumer: &Consumer,
        token_secret: Option<&str>,
        timestamp_threshold: Option<Duration>,
    ) -> Result<(), SignatureError> {
        if let Some(version) = params.get("oauth_version") {
            if version != "1.0" {
                return Err(SignatureError::UnsupportedVersion(version.to_string()));
            }
        }

        if let Some(threshold) = timestamp_threshold {
            let raw = params
                .get_non_empty("oauth_timestamp")
                .ok_or(SignatureError::MissingParameter("oauth_timestamp"))?;
            let timestamp: i64 = raw
                .parse()
                .map_err(|_| SignatureError::StaleTimestamp(raw.to_string()))?;
            let skew = Utc::now().timestamp().saturating_sub(timestamp).unsigned_abs();
            if skew > threshold.as_secs() {
                return Err(SignatureError::StaleTimestamp(raw.to_string()));
            }
        }

        let method = params
            .get_non_empty("oauth_signature_method")
            .ok_or(SignatureError::MissingParameter("oauth_signature_method"))?;
        if !self.methods.contains_key(method) {
            return Err(SignatureError::UnsupportedMethod(method.to_string()));
        }
        let signature = params
            .get_non_empty("oauth_signature")
            .ok_or(SignatureError::MissingParameter("oauth_signature"))?;

        let base = signing_base(&request.method, &request.url, &signature_params(request));
        if self.verify(method, &base, consumer, token_secret, signature) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}
