use std::collections::BTreeMap;

use url::Url;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The parts of an inbound HTTP request the OAuth core looks at
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    /// Absolute URL as the client addressed it, query string included
    pub url: Url,
    pub authorization: Option<String>,
    /// Raw body, only captured for form-urlencoded requests
    pub form_body: Option<String>,
}

impl TransportRequest {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            authorization: None,
            form_body: None,
        }
    }

    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    pub fn with_form_body(mut self, body: impl Into<String>) -> Self {
        self.form_body = Some(body.into());
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }
}

/// OAuth protocol parameters of one request: `oauth_*` keys plus `realm`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthParams(BTreeMap<String, String>);

impl OAuthParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Present and non-empty
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every key is an `oauth_` key (a bare `realm` does not count)
    pub fn only_oauth_keys(&self) -> bool {
        self.keys().all(|k| k.starts_with("oauth_"))
    }

    /// Any key that is neither `oauth_*` nor a realm
    pub fn has_foreign_keys(&self) -> bool {
        self.keys()
            .any(|k| !k.starts_with("oauth_") && !k.eq_ignore_ascii_case("realm"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OAuthParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("not an OAuth authorization header")]
    NotOAuth,
    #[error("malformed parameter: {0}")]
    Malformed(String),
    #[error("invalid percent-encoding in {0}")]
    Encoding(String),
}

/// Collect OAuth parameters from query string, form body and `Authorization`
/// header, later sources overriding earlier ones.
pub fn extract(request: &TransportRequest) -> OAuthParams {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();

    merged.extend(query_pairs(request));
    merged.extend(form_pairs(request));
    merged.extend(header_pairs(request));

    merged.retain(|k, _| k.starts_with("oauth_") || k == "realm");
    OAuthParams(merged)
}

/// Parameters that enter the signature base besides the URL query: the form
/// body in full and the header's oauth entries.
pub fn signature_params(request: &TransportRequest) -> Vec<(String, String)> {
    let mut pairs = form_pairs(request);
    pairs.extend(header_pairs(request));
    pairs
}

fn query_pairs(request: &TransportRequest) -> Vec<(String, String)> {
    request
        .url
        .query()
        .map(parse_urlencoded)
        .unwrap_or_default()
}

fn form_pairs(request: &TransportRequest) -> Vec<(String, String)> {
    request
        .form_body
        .as_deref()
        .map(parse_urlencoded)
        .unwrap_or_default()
}

fn header_pairs(request: &TransportRequest) -> Vec<(String, String)> {
    let Some(header) = request.authorization.as_deref() else {
        return Vec::new();
    };
    match parse_authorization_header(header) {
        Ok(pairs) => pairs,
        Err(HeaderError::NotOAuth) => Vec::new(),
        Err(e) => {
            // someone else's problem, most likely
            tracing::debug!("ignoring Authorization header: {}", e);
            Vec::new()
        }
    }
}

pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(input).unwrap_or_else(|e| {
        tracing::debug!("unparseable urlencoded parameters: {}", e);
        Vec::new()
    })
}

/// Parse an `Authorization: OAuth k="v", ...` header. `realm` is dropped.
pub fn parse_authorization_header(header: &str) -> Result<Vec<(String, String)>, HeaderError> {
    let header = header.trim_start();
    let is_oauth = header
        .get(..6)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("oauth "));
    if !is_oauth {
        return Err(HeaderError::NotOAuth);
    }

    let mut pairs = Vec::new();
    for part in header[6..].split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| HeaderError::Malformed(part.to_string()))?;
        let key = key.trim();
        if key.eq_ignore_ascii_case("realm") {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        let value =
            urlencoding::decode(value).map_err(|_| HeaderError::Encoding(key.to_string()))?;
        pairs.push((key.to_string(), value.into_owned()));
    }
    Ok(pairs)
}
