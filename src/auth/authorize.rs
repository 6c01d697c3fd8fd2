use super::OAuthService;
use super::manager::OUT_OF_BAND;
use super::traits::{RequestToken, StoreError};
use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

// the user is expected to be signed in already, by whatever sits in front of
// us. we only read who they are from the configured header.

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    #[error("missing oauth_token")]
    MissingToken,
    #[error("request token not found or expired")]
    UnknownToken,
    #[error("request token was already authorized")]
    AlreadyAuthorized,
    #[error("no signed-in user")]
    NoUser,
    #[error("token store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AuthorizeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthorizeError::UnknownToken,
            StoreError::AlreadyAuthorized => AuthorizeError::AlreadyAuthorized,
            other => AuthorizeError::Store(other),
        }
    }
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthorizeError::MissingToken | AuthorizeError::UnknownToken => StatusCode::NOT_FOUND,
            AuthorizeError::AlreadyAuthorized => StatusCode::CONFLICT,
            AuthorizeError::NoUser => StatusCode::UNAUTHORIZED,
            AuthorizeError::Store(e) => {
                tracing::error!("authorization failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            // don't leak store internals
            AuthorizeError::Store(_) => "Something went wrong, please try again".to_string(),
            other => other.to_string(),
        };
        (status, page_headers(), Html(message_page("Authorization failed", &message)))
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub oauth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeDecision {
    pub oauth_token: String,
    pub approve: Option<String>,
}

/// Shows consent page for a pending request token
pub async fn authorize_page_handler(
    State(service): State<Arc<OAuthService>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, AuthorizeError> {
    let key = query
        .oauth_token
        .filter(|k| !k.is_empty())
        .ok_or(AuthorizeError::MissingToken)?;
    let token = pending_token(&service, &key).await?;

    let consumer = service.tokens().get_consumer_by_key(&token.consumer_key).await;
    let consumer_name = consumer
        .and_then(|c| c.name)
        .unwrap_or_else(|| token.consumer_key.clone());

    tracing::debug!("showing consent page for consumer {}", token.consumer_key);

    let html = consent_page(&consumer_name, &token.key, &service.config().authorize_path);
    Ok((page_headers(), Html(html)).into_response())
}

/// Handles the approve/deny button click
pub async fn authorize_decision_handler(
    State(service): State<Arc<OAuthService>>,
    headers: HeaderMap,
    Form(decision): Form<AuthorizeDecision>,
) -> Result<Response, AuthorizeError> {
    let userid = headers
        .get(service.user_header())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(AuthorizeError::NoUser)?
        .to_string();

    if decision.approve.as_deref() != Some("true") {
        let token = pending_token(&service, &decision.oauth_token).await?;
        tracing::info!(
            "user {} denied access for consumer {}",
            userid,
            token.consumer_key
        );
        return Ok(denied_response(&token));
    }

    let authorization = service
        .tokens()
        .authorize_request_token(&decision.oauth_token, &userid)
        .await?;

    if authorization.callback_url == OUT_OF_BAND {
        // consumer can't take a redirect, the user types the verifier in
        let body = message_page(
            "Access granted",
            &format!(
                "Enter this code in the application: <code>{}</code>",
                html_escape(&authorization.verifier)
            ),
        );
        return Ok((page_headers(), Html(body)).into_response());
    }

    Ok(Redirect::to(&authorization.callback_url).into_response())
}

async fn pending_token(service: &OAuthService, key: &str) -> Result<RequestToken, AuthorizeError> {
    let token = service
        .tokens()
        .get_request_token(key)
        .await
        .ok_or(AuthorizeError::UnknownToken)?;
    if token.is_authorized() {
        return Err(AuthorizeError::AlreadyAuthorized);
    }
    Ok(token)
}

fn denied_response(token: &RequestToken) -> Response {
    let callback = (token.callback != OUT_OF_BAND)
        .then(|| Url::parse(&token.callback).ok())
        .flatten();
    match callback {
        Some(mut url) => {
            url.query_pairs_mut()
                .append_pair("oauth_token", &token.key)
                .append_pair("oauth_problem", "permission_denied");
            Redirect::to(url.as_str()).into_response()
        }
        None => (
            page_headers(),
            Html(message_page(
                "Access denied",
                "The application was not given access. You can close this page.",
            )),
        )
            .into_response(),
    }
}

fn page_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; style-src 'unsafe-inline'"),
    );
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 400px;
            margin: 100px auto;
            padding: 20px;
            text-align: center;
        }
        h1 { color: #333; }
        .consumer, code {
            background: #f5f5f5;
            padding: 10px;
            border-radius: 4px;
            font-family: monospace;
            word-break: break-all;
        }
        .buttons { margin-top: 30px; }
        button {
            padding: 12px 24px;
            margin: 5px;
            border: none;
            border-radius: 4px;
            cursor: pointer;
            font-size: 16px;
            color: white;
        }
        .approve { background: #0066cc; }
        .deny { background: #666; }
"#;

fn consent_page(consumer_name: &str, token_key: &str, action: &str) -> String {
    let token_key = html_escape(token_key);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorize Application</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{style}</style>
</head>
<body>
    <h1>Authorize Application</h1>
    <p>The following application is requesting access to your account:</p>
    <div class="consumer">{consumer}</div>
    <div class="buttons">
        <form method="post" action="{action}">
            <input type="hidden" name="oauth_token" value="{token}">
            <button class="approve" name="approve" value="true">Approve</button>
            <button class="deny" name="approve" value="false">Deny</button>
        </form>
    </div>
</body>
</html>"#,
        style = STYLE,
        consumer = html_escape(consumer_name),
        action = html_escape(action),
        token = token_key,
    )
}

// body is trusted markup, callers escape anything user supplied
fn message_page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{style}</style>
</head>
<body>
    <h1>{title}</h1>
    <p>{body}</p>
</body>
</html>"#,
        title = html_escape(title),
        style = STYLE,
        body = body,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
