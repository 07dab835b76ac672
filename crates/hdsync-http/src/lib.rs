// # HTTP Transport
//
// reqwest-backed implementation of the core `Transport` trait.
//
// ## Sessions
//
// Each `session()` call builds a fresh cookie jar shared by two clients:
// one following redirects and one that does not. A session therefore
// keeps login cookies across its requests (needed for form-login
// providers) while parallel sessions stay isolated.
//
// ## Failure mapping
//
// - No response (DNS, refused, timeout): `Error::ProviderUnreachable`
// - Any status code: `Ok(HttpResponse)`, classified by the fetch loop
//
// Query strings are never logged: some providers put API keys there.

pub mod oauth1;

use async_trait::async_trait;
use hdsync_core::traits::{HttpRequest, HttpResponse, HttpSession, Method, RequestAuth, Transport};
use hdsync_core::{Error, Result};
use reqwest::cookie::Jar;
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default timeout of one HTTP exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent`
pub const USER_AGENT: &str = concat!("hdsync/", env!("CARGO_PKG_VERSION"));

/// Transport producing cookie-isolated reqwest sessions
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    timeout: Duration,
    user_agent: String,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Transport for ReqwestTransport {
    fn session(&self) -> Result<Arc<dyn HttpSession>> {
        Ok(Arc::new(ReqwestSession::new(self.timeout, &self.user_agent)?))
    }
}

/// One cookie jar, two redirect policies
pub struct ReqwestSession {
    following: reqwest::Client,
    direct: reqwest::Client,
}

impl std::fmt::Debug for ReqwestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestSession").finish_non_exhaustive()
    }
}

impl ReqwestSession {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let build = |policy: reqwest::redirect::Policy| {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(user_agent)
                .cookie_provider(jar.clone())
                .redirect(policy)
                .build()
                .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
        };

        Ok(Self {
            following: build(reqwest::redirect::Policy::default())?,
            direct: build(reqwest::redirect::Policy::none())?,
        })
    }

    fn client(&self, follow_redirects: bool) -> &reqwest::Client {
        if follow_redirects {
            &self.following
        } else {
            &self.direct
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
    }
}

/// Request URL with the request's query parameters appended
fn full_url(request: &HttpRequest) -> Result<Url> {
    let mut url = Url::parse(&request.url)
        .map_err(|e| Error::config(format!("Invalid request URL '{}': {}", request.url, e)))?;
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(request.query.iter());
    }
    Ok(url)
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = full_url(&request)?;
        let host = url.host_str().unwrap_or_default().to_string();
        let path = url.path().to_string();

        let mut builder = self
            .client(request.follow_redirects)
            .request(reqwest_method(request.method), url.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match &request.auth {
            RequestAuth::None => {}
            RequestAuth::Bearer(token) => builder = builder.bearer_auth(token),
            RequestAuth::OAuth1(params) => {
                let header = oauth1::authorization_header(
                    params,
                    request.method,
                    &url,
                    &request.form,
                    &oauth1::nonce(),
                    oauth1::timestamp(),
                );
                builder = builder.header(AUTHORIZATION, header);
            }
        }

        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(method = request.method.as_str(), host = %host, path = %path, "Request failed: {}", e);
            Error::unreachable(format!("{} {}{}: {}", request.method.as_str(), host, path, e))
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| Error::transient(format!("Failed to read response body: {}", e)))?;

        tracing::debug!(
            method = request.method.as_str(),
            host = %host,
            path = %path,
            status,
            bytes = body.len(),
            "HTTP exchange"
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
            url: final_url,
        })
    }
}
