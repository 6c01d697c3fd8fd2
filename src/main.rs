mod auth;
mod server;

use anyhow::{Context, Result};
use auth::{Consumer, MemoryTokenStore, OAuthConfig, OAuthService};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "oakey")]
#[command(about = "OAuth 1.0a provider: token issuance and signed request authentication")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "OAKEY_HOST", default_value = "localhost")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "OAKEY_PORT", default_value = "3000")]
    port: u16,

    /// Realm shown in the WWW-Authenticate challenge
    #[arg(long, env = "OAUTH_REALM", default_value = "")]
    realm: String,

    #[arg(long, env = "OAUTH_REQUEST_TOKEN_PATH", default_value = "/oauth/request_token")]
    request_token_path: String,

    #[arg(long, env = "OAUTH_ACCESS_TOKEN_PATH", default_value = "/oauth/access_token")]
    access_token_path: String,

    /// Where users approve or deny request tokens
    #[arg(long, env = "OAUTH_AUTHORIZE_PATH", default_value = "/oauth/authorize")]
    authorize_path: String,

    /// Enabled signature methods, comma separated
    #[arg(
        long,
        env = "OAUTH_SIGNATURE_METHODS",
        value_delimiter = ',',
        default_value = "HMAC-SHA1,RSA-SHA1"
    )]
    signature_methods: Vec<String>,

    /// Accepted clock skew for oauth_timestamp in seconds (0 = don't check)
    #[arg(long, env = "OAUTH_TIMESTAMP_THRESHOLD", default_value = "300")]
    timestamp_threshold: u64,

    /// Request token lifetime in seconds (0 = no expiration)
    #[arg(long, env = "OAUTH_REQUEST_TOKEN_TTL", default_value = "600")]
    request_token_ttl: u64,

    /// Access token lifetime in seconds (0 = no expiration)
    #[arg(long, env = "OAUTH_ACCESS_TOKEN_TTL", default_value = "0")]
    access_token_ttl: u64,

    /// JSON file with a list of consumers: [{"key", "secret", "rsa_key"?, "name"?}]
    #[arg(long, env = "OAUTH_CONSUMERS_FILE")]
    consumers_file: Option<PathBuf>,

    /// Extra consumer as KEY:SECRET, can be repeated
    #[arg(long = "consumer", value_name = "KEY:SECRET")]
    consumers: Vec<String>,

    /// Header the fronting login proxy sets to the signed-in user
    #[arg(long, env = "OAUTH_USER_HEADER", default_value = "x-remote-user")]
    user_header: String,

    /// Public base URL clients use (e.g., https://your-domain.com)
    /// If not set, the Host header of each request is used
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl Args {
    fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            realm: self.realm.clone(),
            request_token_path: self.request_token_path.clone(),
            access_token_path: self.access_token_path.clone(),
            authorize_path: self.authorize_path.clone(),
            signature_methods: self.signature_methods.clone(),
            timestamp_threshold: seconds(self.timestamp_threshold),
            request_token_ttl: seconds(self.request_token_ttl),
            access_token_ttl: seconds(self.access_token_ttl),
            user_header: self.user_header.clone(),
            public_url: self
                .public_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    fn load_consumers(&self) -> Result<Vec<Consumer>> {
        let mut consumers = Vec::new();

        if let Some(path) = &self.consumers_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading consumers file {}", path.display()))?;
            let from_file: Vec<Consumer> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing consumers file {}", path.display()))?;
            consumers.extend(from_file);
        }

        for entry in &self.consumers {
            let (key, secret) = entry
                .split_once(':')
                .filter(|(k, s)| !k.is_empty() && !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("--consumer expects KEY:SECRET, got {:?}", entry))?;
            consumers.push(Consumer::new(key, secret));
        }

        Ok(consumers)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oakey=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let consumers = args.load_consumers()?;
    if consumers.is_empty() {
        tracing::warn!("No consumers configured, every signed request will be rejected");
    }
    tracing::info!("Loaded {} consumers", consumers.len());

    let store = Arc::new(MemoryTokenStore::with_consumers(consumers).await);
    let service = Arc::new(
        OAuthService::new(args.oauth_config(), store.clone())
            .context("invalid OAuth configuration")?,
    );

    run_server(service, store, &args.host, args.port).await
}

async fn run_server(
    service: Arc<OAuthService>,
    store: Arc<MemoryTokenStore>,
    host: &str,
    port: u16,
) -> Result<()> {
    // we pass this to TcpListener::bind() which accepts ToSocketAddrs,
    // so hostnames like "localhost" get resolved properly (unlike SocketAddr::parse)
    let bind_addr = format!("{}:{}", host, port);

    let base_url = service
        .config()
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", host, port));
    let config = service.config();
    tracing::info!("Request token endpoint: {}{}", base_url, config.request_token_path);
    tracing::info!("Authorization page: {}{}", base_url, config.authorize_path);
    tracing::info!("Access token endpoint: {}{}", base_url, config.access_token_path);

    // Rate limiting: 10 requests per second per IP, burst of 30
    // SmartIpKeyExtractor checks x-forwarded-for and friends before falling back to peer ip,
    // so this works both behind cloudflare/nginx/whatever and when running locally
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(10)
            .burst_size(30)
            .finish()
            .context("failed to build rate limiter config")?,
    );
    let governor_limiter = governor_conf.limiter().clone();

    // rate limiter state and expired tokens both pile up otherwise
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
            let removed = store.cleanup_expired().await;
            let (request_tokens, access_tokens) = store.len().await;
            tracing::debug!(
                "cleanup: {} expired, {} request / {} access tokens live",
                removed,
                request_tokens,
                access_tokens
            );
        }
    });

    let app = server::build_router(service).layer(GovernorLayer::new(governor_conf));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server ready at {}", base_url);

    // into_make_service_with_connect_info gives us the peer ip for rate limiting fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutting down");
}
