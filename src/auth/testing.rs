//! Client-side signing for tests

use chrono::Utc;
use url::Url;

use super::manager::random_string;
use super::params::TransportRequest;
use super::signature::{HMAC_SHA1, SignatureMethods, percent_encode, signing_base};
use super::traits::Consumer;

/// A complete `Authorization: OAuth ...` header signed with HMAC-SHA1.
/// `form` is the request's form body, which takes part in the signature.
pub fn authorization_header(
    method: &str,
    url: &Url,
    consumer: &Consumer,
    token: Option<(&str, &str)>,
    extra: &[(&str, &str)],
    form: &[(&str, &str)],
) -> String {
    header_signed_with(HMAC_SHA1, method, url, consumer, token, extra, form)
}

fn header_signed_with(
    signature_method: &str,
    method: &str,
    url: &Url,
    consumer: &Consumer,
    token: Option<(&str, &str)>,
    extra: &[(&str, &str)],
    form: &[(&str, &str)],
) -> String {
    let mut oauth: Vec<(String, String)> = vec![
        ("oauth_consumer_key".to_string(), consumer.key.clone()),
        ("oauth_nonce".to_string(), random_string(16)),
        ("oauth_signature_method".to_string(), signature_method.to_string()),
        ("oauth_timestamp".to_string(), Utc::now().timestamp().to_string()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];
    if let Some((key, _)) = token {
        oauth.push(("oauth_token".to_string(), key.to_string()));
    }
    oauth.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    let mut signed = oauth.clone();
    signed.extend(form.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    let base = signing_base(method, url, &signed);
    let signature = SignatureMethods::from_names(&[signature_method])
        .unwrap()
        .sign(signature_method, &base, consumer, token.map(|(_, secret)| secret))
        .unwrap();
    oauth.push(("oauth_signature".to_string(), signature));

    let fields: Vec<String> = oauth
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
        .collect();
    format!("OAuth realm=\"test\", {}", fields.join(", "))
}

pub fn signed_request(
    method: &str,
    url: &str,
    consumer: &Consumer,
    token: Option<(&str, &str)>,
    extra: &[(&str, &str)],
) -> TransportRequest {
    signed_request_with(HMAC_SHA1, method, url, consumer, token, extra)
}

#[cfg_attr(not(feature = "rsa-sha1"), allow(dead_code))]
pub fn signed_request_with(
    signature_method: &str,
    method: &str,
    url: &str,
    consumer: &Consumer,
    token: Option<(&str, &str)>,
    extra: &[(&str, &str)],
) -> TransportRequest {
    let url = Url::parse(url).unwrap();
    let header = header_signed_with(signature_method, method, &url, consumer, token, extra, &[]);
    TransportRequest::new(method, url).with_authorization(header)
}
