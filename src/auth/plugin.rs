use async_trait::async_trait;

use super::orchestrator::{AuthResult, Authenticator};
use super::params::{OAuthParams, TransportRequest, extract};
use super::traits::HostPlugin;

/// The OAuth provider as the host middleware sees it
#[derive(Clone)]
pub struct OAuthPlugin {
    realm: String,
    authenticator: Authenticator,
}

impl OAuthPlugin {
    pub fn new(realm: impl Into<String>, authenticator: Authenticator) -> Self {
        Self {
            realm: realm.into(),
            authenticator,
        }
    }
}

#[async_trait]
impl HostPlugin for OAuthPlugin {
    fn identify(&self, request: &TransportRequest) -> Option<OAuthParams> {
        let params = extract(request);
        // token endpoints still get a say, a bare POST there earns a challenge
        if params.is_empty()
            && !self
                .authenticator
                .classify(request, &params)
                .is_token_endpoint()
        {
            return None;
        }
        Some(params)
    }

    async fn authenticate(&self, request: &TransportRequest, params: &OAuthParams) -> AuthResult {
        self.authenticator.authenticate(request, params).await
    }

    fn challenge(&self) -> String {
        format!("OAuth realm=\"{}\"", self.realm.replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::classify::TokenPaths;
    use crate::auth::manager::TokenManager;
    use crate::auth::signature::SignatureMethods;
    use crate::auth::store::MemoryTokenStore;
    use std::sync::Arc;
    use url::Url;

    fn plugin(realm: &str) -> OAuthPlugin {
        let manager = TokenManager::new(Arc::new(MemoryTokenStore::new()), None, None);
        let authenticator = Authenticator::new(
            manager,
            SignatureMethods::from_names(&["HMAC-SHA1"]).unwrap(),
            TokenPaths::default(),
            None,
        );
        OAuthPlugin::new(realm, authenticator)
    }

    #[test]
    fn challenge_carries_the_realm() {
        assert_eq!(plugin("MyRealm").challenge(), r#"OAuth realm="MyRealm""#);
        assert_eq!(plugin("").challenge(), r#"OAuth realm="""#);
    }

    #[test]
    fn identify_skips_requests_without_credentials() {
        let plugin = plugin("r");
        let plain = TransportRequest::new("GET", Url::parse("http://h/page?x=1").unwrap());
        assert!(plugin.identify(&plain).is_none());

        let token_endpoint =
            TransportRequest::new("POST", Url::parse("http://h/oauth/request_token").unwrap());
        assert_eq!(plugin.identify(&token_endpoint), Some(OAuthParams::default()));

        let signed =
            TransportRequest::new("GET", Url::parse("http://h/page?oauth_consumer_key=ck").unwrap());
        assert_eq!(
            plugin.identify(&signed).unwrap().get("oauth_consumer_key"),
            Some("ck")
        );
    }
}
