// # Transport Trait
//
// Defines the HTTP interface adapters use to talk to providers.
//
// ## Sessions
//
// Every connect or update call obtains its own [`HttpSession`] from the
// [`Transport`]. A session carries its own cookie jar, so concurrent
// updates for different users never share login state.
//
// ## Failures
//
// `send` returns `Err` only when no HTTP response was obtained at all
// (DNS failure, refused connection, timeout). Any status code, including
// 4xx/5xx, is returned as `Ok(HttpResponse)` and classified by the caller.
//
// ## Usage
//
// ```rust,ignore
// use hdsync_core::traits::{HttpRequest, Transport};
//
// let session = transport.session()?;
// let response = session
//     .send(HttpRequest::get("https://api.example.com/items").query("page", "1"))
//     .await?;
// ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::{Error, Result};

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// OAuth 1.0a signing material
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OAuth1Params {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<String>,
    pub token_secret: Option<String>,
    /// Sent as `oauth_callback` (request-token step)
    pub callback: Option<String>,
    /// Sent as `oauth_verifier` (access-token step)
    pub verifier: Option<String>,
}

impl OAuth1Params {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.token_secret = Some(token_secret.into());
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.verifier = Some(verifier.into());
        self
    }
}

impl std::fmt::Debug for OAuth1Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Params")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<REDACTED>")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<REDACTED>"))
            .field("callback", &self.callback)
            .finish()
    }
}

/// How a request is authorized
#[derive(Clone, Default, PartialEq, Eq)]
pub enum RequestAuth {
    #[default]
    None,
    /// OAuth2 bearer token
    Bearer(String),
    /// OAuth 1.0a HMAC-SHA1 signature
    OAuth1(OAuth1Params),
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestAuth::None => f.write_str("None"),
            RequestAuth::Bearer(_) => f.write_str("Bearer(<REDACTED>)"),
            RequestAuth::OAuth1(params) => f.debug_tuple("OAuth1").field(params).finish(),
        }
    }
}

/// A single outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body fields
    pub form: Vec<(String, String)>,
    pub auth: RequestAuth,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            form: Vec::new(),
            auth: RequestAuth::None,
            follow_redirects: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    pub fn auth(mut self, auth: RequestAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn bearer(self, token: impl Into<String>) -> Self {
        self.auth(RequestAuth::Bearer(token.into()))
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// First value of a query parameter
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Follow-up GET to `url` carrying the same headers and authorization
    pub fn follow_up(&self, url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: self.headers.clone(),
            form: Vec::new(),
            auth: self.auth.clone(),
            follow_redirects: self.follow_redirects,
        }
    }
}

/// A received response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// URL after redirects
    pub url: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            url: String::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Decode a JSON body; malformed payloads are transient failures
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::transient(format!("malformed JSON response: {}", e)))
    }
}

/// One logical HTTP session with its own cookie jar
#[async_trait]
pub trait HttpSession: Send + Sync {
    /// Send a request
    ///
    /// # Returns
    ///
    /// - `Ok(HttpResponse)`: any response, whatever its status
    /// - `Err(Error::ProviderUnreachable)`: no response was obtained
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Factory for HTTP sessions
pub trait Transport: Send + Sync {
    /// Open a fresh session with an empty cookie jar
    fn session(&self) -> Result<Arc<dyn HttpSession>>;
}
