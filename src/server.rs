use crate::auth::{
    self, HostPlugin, Identity, OAuthService, challenge_response, is_consumer, is_oauth_user,
    not_oauth,
};
use axum::{
    Extension, Json, Router, middleware,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Routes of the demo service. Token endpoints have no routes of their own:
/// the OAuth middleware answers them before the fallback is reached.
pub fn build_router(service: Arc<OAuthService>) -> Router {
    let authorize_path = service.config().authorize_path.clone();

    Router::new()
        .route("/whoami", get(whoami))
        .route("/resource", get(resource))
        .route("/resource/user", get(user_resource))
        .route("/web", get(web_only))
        .route(
            &authorize_path,
            get(auth::authorize_page_handler).post(auth::authorize_decision_handler),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            service.clone(),
            auth::oauth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// 401 with the challenge when nobody is authenticated, 403 when the
/// identity is there but doesn't qualify
fn unmet(service: &OAuthService, identity: Option<&Identity>, message: &str) -> Response {
    if identity.is_none() {
        return challenge_response(&service.plugin().challenge());
    }
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}

async fn whoami(
    State(service): State<Arc<OAuthService>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    match identity {
        Some(Extension(identity)) => Json(identity).into_response(),
        None => challenge_response(&service.plugin().challenge()),
    }
}

/// Any OAuth consumer, acting for itself or for a user
async fn resource(
    State(service): State<Arc<OAuthService>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    let identity = identity.map(|Extension(id)| id);
    let id = identity.as_ref();
    if !is_consumer(id, None) && !is_oauth_user(id, None, None) {
        return unmet(&service, id, "The current user must be an OAuth consumer");
    }
    Json(json!({ "resource": "shared", "identity": identity })).into_response()
}

async fn user_resource(
    State(service): State<Arc<OAuthService>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    let identity = identity.map(|Extension(id)| id);
    let id = identity.as_ref();
    if !is_oauth_user(id, None, None) {
        return unmet(
            &service,
            id,
            "The current user must be a consumer acting on behalf of a user",
        );
    }
    Json(json!({ "resource": "private", "identity": identity })).into_response()
}

/// Browser-only page, OAuth credentials are not welcome here
async fn web_only(identity: Option<Extension<Identity>>) -> Response {
    let identity = identity.map(|Extension(id)| id);
    if !not_oauth(identity.as_ref()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Access through OAuth forbidden" })),
        )
            .into_response();
    }
    Json(json!({ "resource": "web" })).into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::authorization_header;
    use crate::auth::{Consumer, MemoryTokenStore, OAuthConfig};
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;
    use url::Url;

    const ORIGIN: &str = "http://oauth.example";

    async fn app() -> (Router, Arc<OAuthService>, Consumer) {
        app_with(Some(ORIGIN)).await
    }

    async fn app_with(public_url: Option<&str>) -> (Router, Arc<OAuthService>, Consumer) {
        let consumer = Consumer::new("demo-consumer", "demo-secret");
        let store = MemoryTokenStore::with_consumers([consumer.clone()]).await;
        let config = OAuthConfig {
            realm: "Demo".to_string(),
            public_url: public_url.map(str::to_string),
            ..Default::default()
        };
        let service = Arc::new(OAuthService::new(config, Arc::new(store)).unwrap());
        (build_router(service.clone()), service, consumer)
    }

    fn signed(
        method: &str,
        path: &str,
        consumer: &Consumer,
        token: Option<(&str, &str)>,
        extra: &[(&str, &str)],
    ) -> Request<Body> {
        let url = Url::parse(&format!("{}{}", ORIGIN, path)).unwrap();
        Request::builder()
            .method(method)
            .uri(path)
            .header(
                header::AUTHORIZATION,
                authorization_header(method, &url, consumer, token, extra, &[]),
            )
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn form_pairs(body: &str) -> Vec<(String, String)> {
        serde_urlencoded::from_str(body).unwrap()
    }

    fn value<'a>(pairs: &'a [(String, String)], key: &str) -> &'a str {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_whoami_is_challenged() {
        let (app, _, _) = app().await;
        let response = app
            .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"OAuth realm="Demo""#
        );
    }

    #[tokio::test]
    async fn two_legged_request_reaches_resource() {
        let (app, _, consumer) = app().await;
        let response = app
            .clone()
            .oneshot(signed("GET", "/resource?page=1", &consumer, None, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("consumer:demo-consumer"));

        // a consumer on its own is not a user
        let response = app
            .oneshot(signed("GET", "/resource/user", &consumer, None, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bad_signature_on_resource_is_not_an_identity() {
        let (app, _, _) = app().await;
        let impostor = Consumer::new("demo-consumer", "guessed-secret");
        let response = app
            .oneshot(signed("GET", "/resource", &impostor, None, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_endpoint_without_callback_is_challenged() {
        let (app, _, consumer) = app().await;
        let response = app
            .oneshot(signed("POST", "/oauth/request_token", &consumer, None, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"OAuth realm="Demo""#
        );
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_404() {
        let (app, _, _) = app().await;
        let response = app
            .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_forms_only_matter_on_token_endpoints() {
        let (app, _, _) = app().await;
        let big = format!("comment={}", "x".repeat(70 * 1024));
        let post = |path: &str| {
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(big.clone()))
                .unwrap()
        };

        let response = app.clone().oneshot(post("/nowhere")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(post("/oauth/request_token")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unparseable_host_skips_oauth() {
        let (app, _, _) = app_with(None).await;
        let get = |path: &str| {
            Request::get(path)
                .header(header::HOST, "bad host")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(get("/web")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/oauth/request_token")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn web_page_refuses_oauth() {
        let (app, _, consumer) = app().await;
        let response = app
            .clone()
            .oneshot(Request::get("/web").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(signed("GET", "/web", &consumer, None, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn signed_form_body_params_are_covered() {
        let (app, _, consumer) = app().await;
        let url = Url::parse(&format!("{}/oauth/request_token", ORIGIN)).unwrap();
        let form = [("oauth_callback", "oob")];
        let request = Request::post("/oauth/request_token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(
                header::AUTHORIZATION,
                authorization_header("POST", &url, &consumer, None, &[], &form),
            )
            .body(Body::from("oauth_callback=oob"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pairs = form_pairs(&body_string(response).await);
        assert_eq!(value(&pairs, "oauth_callback_confirmed"), "true");
    }

    #[tokio::test]
    async fn full_three_legged_dance() {
        let (app, service, consumer) = app().await;

        // 1. request token
        let response = app
            .clone()
            .oneshot(signed(
                "POST",
                "/oauth/request_token",
                &consumer,
                None,
                &[("oauth_callback", "http://client.example/done?x=2")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        let pairs = form_pairs(&body_string(response).await);
        let request_key = value(&pairs, "oauth_token").to_string();
        let request_secret = value(&pairs, "oauth_token_secret").to_string();
        assert_eq!(value(&pairs, "oauth_callback_confirmed"), "true");

        // 2. the user looks at the consent page, then approves
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/oauth/authorize?oauth_token={}", request_key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains(&request_key));

        let response = app
            .clone()
            .oneshot(
                Request::post("/oauth/authorize")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header("x-remote-user", "alice")
                    .body(Body::from(format!(
                        "oauth_token={}&approve=true",
                        request_key
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        let location = Url::parse(location).unwrap();
        assert_eq!(location.path(), "/done");
        let query: Vec<(String, String)> = location.query_pairs().into_owned().collect();
        assert_eq!(value(&query, "x"), "2");
        assert_eq!(value(&query, "oauth_token"), request_key);
        let verifier = value(&query, "oauth_verifier").to_string();

        // 3. access token
        let exchange = || {
            signed(
                "POST",
                "/oauth/access_token",
                &consumer,
                Some((request_key.as_str(), request_secret.as_str())),
                &[("oauth_verifier", verifier.as_str())],
            )
        };
        let response = app.clone().oneshot(exchange()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pairs = form_pairs(&body_string(response).await);
        let access_key = value(&pairs, "oauth_token").to_string();
        let access_secret = value(&pairs, "oauth_token_secret").to_string();
        assert!(service.tokens().get_request_token(&request_key).await.is_none());

        // the request token is spent
        let response = app.clone().oneshot(exchange()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // 4. protected resource as alice
        let response = app
            .oneshot(signed(
                "GET",
                "/resource/user",
                &consumer,
                Some((access_key.as_str(), access_secret.as_str())),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"userid\":\"alice\""));
    }

    #[tokio::test]
    async fn authorize_requires_signed_in_user() {
        let (app, service, consumer) = app().await;
        let token = service
            .tokens()
            .create_request_token(&consumer, "oob")
            .await
            .unwrap();

        let decide = |user: Option<&str>, approve: &str| {
            let mut builder = Request::post("/oauth/authorize")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(user) = user {
                builder = builder.header("x-remote-user", user);
            }
            builder
                .body(Body::from(format!(
                    "oauth_token={}&approve={}",
                    token.key, approve
                )))
                .unwrap()
        };

        let response = app.clone().oneshot(decide(None, "true")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // oob shows the verifier instead of redirecting
        let response = app.clone().oneshot(decide(Some("bob"), "true")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = service.tokens().get_request_token(&token.key).await.unwrap();
        let verifier = stored.verifier.unwrap();
        assert!(body_string(response).await.contains(&verifier));

        // binding happens once
        let response = app.oneshot(decide(Some("mallory"), "true")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn denial_redirects_with_problem() {
        let (app, service, consumer) = app().await;
        let token = service
            .tokens()
            .create_request_token(&consumer, "https://client.example/cb")
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::post("/oauth/authorize")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header("x-remote-user", "alice")
                    .body(Body::from(format!("oauth_token={}&approve=false", token.key)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://client.example/cb?"));
        assert!(location.contains("oauth_problem=permission_denied"));

        let response = app
            .oneshot(
                Request::get("/oauth/authorize?oauth_token=unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
