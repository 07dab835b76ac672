//! OAuth 1.0a request signing (HMAC-SHA1, RFC 5849)
//!
//! The signature covers the method, the base URL and every query, form
//! and `oauth_*` parameter, percent-encoded with the RFC 3986 unreserved
//! set and sorted by key then value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hdsync_core::traits::{Method, OAuth1Params};
use rand::Rng;
use rand::distributions::Alphanumeric;
use ring::hmac;
use url::Url;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const VERSION: &str = "1.0";
const NONCE_LEN: usize = 32;

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Random nonce for one request
pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Current Unix time in seconds
pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The `oauth_*` protocol parameters, without the signature
fn protocol_parameters(params: &OAuth1Params, nonce: &str, timestamp: i64) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("oauth_consumer_key".to_string(), params.consumer_key.clone()),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_signature_method".to_string(), SIGNATURE_METHOD.to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        ("oauth_version".to_string(), VERSION.to_string()),
    ];
    if let Some(token) = &params.token {
        pairs.push(("oauth_token".to_string(), token.clone()));
    }
    if let Some(callback) = &params.callback {
        pairs.push(("oauth_callback".to_string(), callback.clone()));
    }
    if let Some(verifier) = &params.verifier {
        pairs.push(("oauth_verifier".to_string(), verifier.clone()));
    }
    pairs
}

/// `scheme://host[:port]/path` with default ports elided
fn base_url(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}

/// Signature base string for a request
///
/// `url` carries the query; `form` holds urlencoded body fields.
pub fn base_string(
    method: Method,
    url: &Url,
    form: &[(String, String)],
    protocol: &[(String, String)],
) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .chain(form.iter().map(|(k, v)| (encode(k), encode(v))))
        .chain(protocol.iter().map(|(k, v)| (encode(k), encode(v))))
        .collect();
    pairs.sort();

    let normalized = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.as_str(),
        encode(&base_url(url)),
        encode(&normalized)
    )
}

/// Base64 HMAC-SHA1 of `base` keyed by the consumer and token secrets
pub fn sign(base: &str, consumer_secret: &str, token_secret: Option<&str>) -> String {
    let signing_key = format!(
        "{}&{}",
        encode(consumer_secret),
        encode(token_secret.unwrap_or_default())
    );
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
    STANDARD.encode(hmac::sign(&key, base.as_bytes()).as_ref())
}

/// `Authorization` header value for a signed request
pub fn authorization_header(
    params: &OAuth1Params,
    method: Method,
    url: &Url,
    form: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> String {
    let mut protocol = protocol_parameters(params, nonce, timestamp);
    let base = base_string(method, url, form, &protocol);
    let signature = sign(&base, &params.consumer_secret, params.token_secret.as_deref());
    protocol.push(("oauth_signature".to_string(), signature));
    protocol.sort();

    let fields = protocol
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {}", fields)
}
