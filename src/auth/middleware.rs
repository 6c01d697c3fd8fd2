use super::{OAuthConfig, OAuthService};
use super::orchestrator::{AuthResult, TokenResponse};
use super::params::{FORM_CONTENT_TYPE, TransportRequest};
use super::traits::HostPlugin;
use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use url::Url;

/// Token requests are small; anything bigger is not ours to buffer
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Runs the OAuth plugin in front of every route.
///
/// An authenticated request gets an [`Identity`](super::Identity) extension.
/// Token endpoint requests never reach the inner service: they are answered
/// here with the issued token or a 401 challenge.
pub async fn oauth_middleware(
    State(service): State<Arc<OAuthService>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let token_endpoint = is_token_endpoint(service.config(), parts.uri.path());

    // the body has to be read for form params, then put back for the handler
    let (body, form) = if is_form(&parts.headers) {
        buffer_form(&parts, body).await
    } else {
        (body, None)
    };
    if token_endpoint && is_form(&parts.headers) && form.is_none() {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let public_url = service.config().public_url.as_deref();
    let Some(transport) = transport_request(&parts, form.as_ref(), public_url) else {
        tracing::debug!("could not rebuild request url for {}, skipping oauth", parts.uri);
        if token_endpoint {
            return StatusCode::BAD_REQUEST.into_response();
        }
        return next.run(Request::from_parts(parts, body)).await;
    };

    let plugin = service.plugin();
    if let Some(params) = plugin.identify(&transport) {
        match plugin.authenticate(&transport, &params).await {
            AuthResult::Identity(identity) => {
                tracing::debug!(
                    "{} {} authenticated as {}",
                    transport.method,
                    transport.path(),
                    identity.userid
                );
                parts.extensions.insert(identity);
            }
            AuthResult::PassThrough | AuthResult::Reject { challenge: false } => {}
            AuthResult::Reject { challenge: true } => {
                return challenge_response(&plugin.challenge());
            }
            AuthResult::Issued(response) => return token_response(&response),
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

fn is_token_endpoint(config: &OAuthConfig, path: &str) -> bool {
    path == config.request_token_path || path == config.access_token_path
}

/// Reads a form body whose declared size fits, handing back a body the
/// handler can still consume. Bodies of unknown or excessive size are left
/// alone and contribute no parameters.
async fn buffer_form(parts: &Parts, body: Body) -> (Body, Option<Bytes>) {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| body.size_hint().exact());
    let fits = declared.is_some_and(|len| len <= MAX_FORM_BYTES as u64);
    if !fits {
        tracing::debug!("not buffering form body of {:?} bytes for {}", declared, parts.uri);
        return (body, None);
    }

    match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => (Body::from(bytes.clone()), Some(bytes)),
        Err(e) => {
            // the stream is gone either way, the handler sees an empty body
            tracing::warn!("could not buffer form body for {}: {}", parts.uri, e);
            (Body::empty(), None)
        }
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

fn transport_request(
    parts: &Parts,
    form: Option<&Bytes>,
    public_url: Option<&str>,
) -> Option<TransportRequest> {
    let origin = match public_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            let host = parts
                .headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .or_else(|| parts.uri.authority().map(|a| a.as_str()))
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = Url::parse(&format!("{}{}", origin, path_and_query)).ok()?;

    let mut transport = TransportRequest::new(parts.method.as_str(), url);
    if let Some(auth) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        transport = transport.with_authorization(auth);
    }
    if let Some(body) = form.and_then(|b| std::str::from_utf8(b).ok()) {
        transport = transport.with_form_body(body);
    }
    Some(transport)
}

/// 401 carrying the plugin's `WWW-Authenticate` challenge
pub fn challenge_response(challenge: &str) -> Response {
    let mut headers = HeaderMap::new();
    let value =
        HeaderValue::from_str(challenge).unwrap_or_else(|_| HeaderValue::from_static("OAuth"));
    headers.insert(header::WWW_AUTHENTICATE, value);
    (StatusCode::UNAUTHORIZED, headers).into_response()
}

fn token_response(response: &TokenResponse) -> Response {
    match serde_urlencoded::to_string(response) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, FORM_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode token response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
