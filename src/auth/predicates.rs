//! Checks over the identity the middleware attached to a request.
//!
//! Consumer keys and user ids are compared as strings only; whether they
//! still exist in the store is not checked here.

use super::orchestrator::{CONSUMER_PREFIX, Identity};

/// A consumer acting on its own behalf (2-legged), optionally a specific one
pub fn is_consumer(identity: Option<&Identity>, consumer_key: Option<&str>) -> bool {
    let Some(identity) = identity else {
        return false;
    };
    let Some(acting) = identity.userid.strip_prefix(CONSUMER_PREFIX) else {
        return false;
    };
    !identity.consumer_key.is_empty()
        && identity.consumer_key == acting
        && consumer_key.is_none_or(|wanted| wanted == identity.consumer_key)
}

/// A consumer acting on behalf of a user (3-legged)
pub fn is_oauth_user(
    identity: Option<&Identity>,
    userid: Option<&str>,
    consumer_key: Option<&str>,
) -> bool {
    let Some(identity) = identity else {
        return false;
    };
    !identity.userid.is_empty()
        && !identity.is_consumer()
        && !identity.consumer_key.is_empty()
        && userid.is_none_or(|wanted| wanted == identity.userid)
        && consumer_key.is_none_or(|wanted| wanted == identity.consumer_key)
}

/// The request did not come in through OAuth at all
pub fn not_oauth(identity: Option<&Identity>) -> bool {
    identity.is_none_or(|id| !id.is_consumer() && id.consumer_key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(userid: &str, consumer_key: &str) -> Identity {
        Identity {
            userid: userid.to_string(),
            consumer_key: consumer_key.to_string(),
        }
    }

    #[test]
    fn consumer_identity() {
        let id = identity("consumer:app", "app");
        assert!(is_consumer(Some(&id), None));
        assert!(is_consumer(Some(&id), Some("app")));
        assert!(!is_consumer(Some(&id), Some("other-app")));
        assert!(!is_consumer(None, None));

        // prefix and consumer key must agree
        assert!(!is_consumer(Some(&identity("consumer:app", "other")), None));
        assert!(!is_consumer(Some(&identity("consumer:app", "")), None));
        assert!(!is_consumer(Some(&identity("alice", "app")), None));
    }

    #[test]
    fn oauth_user_identity() {
        let id = identity("alice", "app");
        assert!(is_oauth_user(Some(&id), None, None));
        assert!(is_oauth_user(Some(&id), Some("alice"), Some("app")));
        assert!(!is_oauth_user(Some(&id), Some("bob"), None));
        assert!(!is_oauth_user(Some(&id), None, Some("other-app")));
        assert!(!is_oauth_user(Some(&identity("consumer:app", "app")), None, None));
        assert!(!is_oauth_user(Some(&identity("alice", "")), None, None));
        assert!(!is_oauth_user(None, None, None));
    }

    #[test]
    fn not_oauth_identity() {
        assert!(not_oauth(None));
        assert!(!not_oauth(Some(&identity("alice", "app"))));
        assert!(!not_oauth(Some(&identity("consumer:app", "app"))));
    }
}
