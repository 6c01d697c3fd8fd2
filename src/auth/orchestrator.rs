use std::time::Duration;

use serde::Serialize;
use subtle::ConstantTimeEq;

use super::classify::{RequestType, TokenPaths, classify};
use super::manager::{TokenManager, is_acceptable_callback};
use super::params::{OAuthParams, TransportRequest};
use super::signature::SignatureMethods;
use super::traits::{AccessToken, Consumer, RequestToken};

/// Prefix of the identity a consumer gets when acting for itself
pub const CONSUMER_PREFIX: &str = "consumer:";

/// Who a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// The user behind the access token, or `consumer:<key>` for 2-legged requests
    pub userid: String,
    pub consumer_key: String,
}

impl Identity {
    pub fn is_consumer(&self) -> bool {
        self.userid.starts_with(CONSUMER_PREFIX)
    }
}

/// Body of a token endpoint response, sent form-urlencoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub oauth_token: String,
    pub oauth_token_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_callback_confirmed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Identity(Identity),
    /// Not ours to judge; the request carries on unauthenticated
    PassThrough,
    /// `challenge` asks the host to answer with a 401 right away
    Reject { challenge: bool },
    /// A token endpoint succeeded; this response replaces the downstream handler
    Issued(TokenResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    RequirePost,
    RequireOAuthOnly,
    RequireCallback,
    ResolveConsumer,
    ResolveRequestToken,
    ResolveAccessToken,
    VerifySignature,
    IssueRequestToken,
    IssueAccessToken,
}

fn pipeline(request_type: RequestType) -> &'static [Step] {
    use Step::*;
    match request_type {
        RequestType::NonOAuth => &[],
        RequestType::TwoLegged => &[ResolveConsumer, VerifySignature],
        RequestType::ThreeLegged => &[ResolveConsumer, ResolveAccessToken, VerifySignature],
        RequestType::RequestToken => &[
            RequirePost,
            RequireOAuthOnly,
            RequireCallback,
            ResolveConsumer,
            VerifySignature,
            IssueRequestToken,
        ],
        RequestType::AccessToken => &[
            RequirePost,
            RequireOAuthOnly,
            ResolveConsumer,
            ResolveRequestToken,
            VerifySignature,
            IssueAccessToken,
        ],
    }
}

#[derive(Debug, Clone)]
enum ResolvedToken {
    Request(RequestToken),
    Access(AccessToken),
}

impl ResolvedToken {
    fn secret(&self) -> &str {
        match self {
            ResolvedToken::Request(t) => &t.secret,
            ResolvedToken::Access(t) => &t.secret,
        }
    }

    fn userid(&self) -> Option<&str> {
        match self {
            ResolvedToken::Request(t) => t.userid.as_deref(),
            ResolvedToken::Access(t) => Some(&t.userid),
        }
    }
}

/// State gathered while one request runs through its pipeline
struct RequestContext<'a> {
    request: &'a TransportRequest,
    params: &'a OAuthParams,
    consumer: Option<Consumer>,
    token: Option<ResolvedToken>,
    throw_challenge: bool,
    issued: Option<TokenResponse>,
}

impl<'a> RequestContext<'a> {
    fn new(request: &'a TransportRequest, params: &'a OAuthParams) -> Self {
        Self {
            request,
            params,
            consumer: None,
            token: None,
            throw_challenge: true,
            issued: None,
        }
    }
}

/// Runs the validation pipeline matching each request's type
#[derive(Clone)]
pub struct Authenticator {
    manager: TokenManager,
    methods: SignatureMethods,
    paths: TokenPaths,
    timestamp_threshold: Option<Duration>,
}

impl Authenticator {
    pub fn new(
        manager: TokenManager,
        methods: SignatureMethods,
        paths: TokenPaths,
        timestamp_threshold: Option<Duration>,
    ) -> Self {
        Self {
            manager,
            methods,
            paths,
            timestamp_threshold,
        }
    }

    pub fn classify(&self, request: &TransportRequest, params: &OAuthParams) -> RequestType {
        classify(request.path(), params, &self.paths)
    }

    pub async fn authenticate(
        &self,
        request: &TransportRequest,
        params: &OAuthParams,
    ) -> AuthResult {
        let request_type = self.classify(request, params);
        let mut ctx = RequestContext::new(request, params);

        for step in pipeline(request_type) {
            if !self.run(*step, &mut ctx).await {
                tracing::debug!(
                    "{} request to {} stopped at {:?}",
                    request_type,
                    request.path(),
                    step
                );
                return Self::failure(request_type, &ctx);
            }
        }

        Self::success(ctx)
    }

    fn failure(request_type: RequestType, ctx: &RequestContext<'_>) -> AuthResult {
        if !ctx.throw_challenge {
            return AuthResult::PassThrough;
        }
        AuthResult::Reject {
            challenge: request_type.is_token_endpoint(),
        }
    }

    fn success(ctx: RequestContext<'_>) -> AuthResult {
        if let Some(issued) = ctx.issued {
            return AuthResult::Issued(issued);
        }
        let Some(consumer) = ctx.consumer else {
            return AuthResult::PassThrough;
        };
        let userid = match ctx.token.as_ref().and_then(ResolvedToken::userid) {
            Some(userid) => userid.to_string(),
            None => format!("{}{}", CONSUMER_PREFIX, consumer.key),
        };
        AuthResult::Identity(Identity {
            userid,
            consumer_key: consumer.key,
        })
    }

    async fn run(&self, step: Step, ctx: &mut RequestContext<'_>) -> bool {
        match step {
            Step::RequirePost => ctx.request.is_post(),
            Step::RequireOAuthOnly => {
                if ctx.params.has_foreign_keys() {
                    // probably someone else's credentials, stay out of it
                    ctx.throw_challenge = false;
                    return false;
                }
                true
            }
            Step::RequireCallback => match ctx.params.get_non_empty("oauth_callback") {
                Some(callback) if is_acceptable_callback(callback) => true,
                Some(callback) => {
                    tracing::warn!("refusing oauth_callback {:?}", callback);
                    false
                }
                None => false,
            },
            Step::ResolveConsumer => self.resolve_consumer(ctx).await,
            Step::ResolveRequestToken => self.resolve_request_token(ctx).await,
            Step::ResolveAccessToken => self.resolve_access_token(ctx).await,
            Step::VerifySignature => self.verify_signature(ctx),
            Step::IssueRequestToken => self.issue_request_token(ctx).await,
            Step::IssueAccessToken => self.issue_access_token(ctx).await,
        }
    }

    async fn resolve_consumer(&self, ctx: &mut RequestContext<'_>) -> bool {
        let Some(key) = ctx.params.get_non_empty("oauth_consumer_key") else {
            return false;
        };
        match self.manager.get_consumer_by_key(key).await {
            Some(consumer) => {
                ctx.consumer = Some(consumer);
                true
            }
            None => {
                tracing::warn!("unknown oauth_consumer_key: {}", key);
                false
            }
        }
    }

    async fn resolve_request_token(&self, ctx: &mut RequestContext<'_>) -> bool {
        let (Some(key), Some(verifier), Some(consumer)) = (
            ctx.params.get_non_empty("oauth_token"),
            ctx.params.get_non_empty("oauth_verifier"),
            ctx.consumer.as_ref(),
        ) else {
            return false;
        };
        let Some(token) = self.manager.get_request_token(key).await else {
            tracing::warn!("unknown request token presented by consumer {}", consumer.key);
            return false;
        };
        if token.consumer_key != consumer.key {
            tracing::warn!(
                "consumer {} presented a request token issued to {}",
                consumer.key,
                token.consumer_key
            );
            return false;
        }
        let matches: bool = token
            .verifier
            .as_deref()
            .is_some_and(|stored| stored.as_bytes().ct_eq(verifier.as_bytes()).into());
        if !matches {
            tracing::warn!("verifier mismatch for consumer {}", consumer.key);
            return false;
        }
        ctx.token = Some(ResolvedToken::Request(token));
        true
    }

    async fn resolve_access_token(&self, ctx: &mut RequestContext<'_>) -> bool {
        let (Some(key), Some(consumer)) =
            (ctx.params.get_non_empty("oauth_token"), ctx.consumer.as_ref())
        else {
            return false;
        };
        match self.manager.get_access_token(key, consumer).await {
            Some(token) => {
                ctx.token = Some(ResolvedToken::Access(token));
                true
            }
            None => {
                tracing::warn!("unknown access token presented by consumer {}", consumer.key);
                false
            }
        }
    }

    fn verify_signature(&self, ctx: &RequestContext<'_>) -> bool {
        let Some(consumer) = ctx.consumer.as_ref() else {
            return false;
        };
        let token_secret = ctx.token.as_ref().map(ResolvedToken::secret);
        match self.methods.verify_request(
            ctx.request,
            ctx.params,
            consumer,
            token_secret,
            self.timestamp_threshold,
        ) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("signature check failed for consumer {}: {}", consumer.key, e);
                false
            }
        }
    }

    async fn issue_request_token(&self, ctx: &mut RequestContext<'_>) -> bool {
        let (Some(consumer), Some(callback)) =
            (ctx.consumer.as_ref(), ctx.params.get("oauth_callback"))
        else {
            return false;
        };
        match self.manager.create_request_token(consumer, callback).await {
            Ok(token) => {
                tracing::info!("issued request token for consumer {}", consumer.key);
                ctx.issued = Some(TokenResponse {
                    oauth_token: token.key,
                    oauth_token_secret: token.secret,
                    oauth_callback_confirmed: Some(true),
                });
                true
            }
            Err(e) => {
                tracing::error!("failed to issue request token: {}", e);
                false
            }
        }
    }

    async fn issue_access_token(&self, ctx: &mut RequestContext<'_>) -> bool {
        let Some(ResolvedToken::Request(request_token)) = ctx.token.as_ref() else {
            return false;
        };
        match self.manager.create_access_token(request_token).await {
            Ok(token) => {
                tracing::info!(
                    "issued access token for user {} via consumer {}",
                    token.userid,
                    token.consumer_key
                );
                ctx.issued = Some(TokenResponse {
                    oauth_token: token.key,
                    oauth_token_secret: token.secret,
                    oauth_callback_confirmed: None,
                });
                true
            }
            Err(e) => {
                // lost a race against another exchange of the same token, usually
                tracing::warn!("access token exchange refused: {}", e);
                false
            }
        }
    }
}
