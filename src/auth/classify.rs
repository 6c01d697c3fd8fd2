use std::fmt;

use super::params::OAuthParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    NonOAuth,
    RequestToken,
    AccessToken,
    TwoLegged,
    ThreeLegged,
}

impl RequestType {
    /// Token endpoints answer failures with a 401 themselves
    pub fn is_token_endpoint(self) -> bool {
        matches!(self, RequestType::RequestToken | RequestType::AccessToken)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::NonOAuth => "non-oauth",
            RequestType::RequestToken => "request-token",
            RequestType::AccessToken => "access-token",
            RequestType::TwoLegged => "2-legged",
            RequestType::ThreeLegged => "3-legged",
        };
        f.write_str(s)
    }
}

/// Paths of the two token endpoints
#[derive(Debug, Clone)]
pub struct TokenPaths {
    pub request_token: String,
    pub access_token: String,
}

impl Default for TokenPaths {
    fn default() -> Self {
        Self {
            request_token: "/oauth/request_token".to_string(),
            access_token: "/oauth/access_token".to_string(),
        }
    }
}

pub fn classify(path: &str, params: &OAuthParams, paths: &TokenPaths) -> RequestType {
    if path == paths.request_token {
        return RequestType::RequestToken;
    }
    if path == paths.access_token {
        return RequestType::AccessToken;
    }
    if !params.is_empty() && params.only_oauth_keys() {
        if params.contains("oauth_token") {
            return RequestType::ThreeLegged;
        }
        return RequestType::TwoLegged;
    }
    RequestType::NonOAuth
}
