//! Shared OAuth connect flows
//!
//! Both flows are two-step: a `connect` without callback parameters
//! yields a redirect to the provider, the callback `connect` exchanges
//! the returned code or verifier for stored credentials.

use hdsync_core::model::{ConnectOutcome, Credentials, optional_parameter};
use hdsync_core::traits::{ConnectContext, HttpRequest, HttpResponse, HttpSession, OAuth1Params, RequestAuth};
use hdsync_core::{Error, Result};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Stored credential keys of OAuth 1.0a connectors
pub const TOKEN: &str = "oauth_token";
pub const TOKEN_SECRET: &str = "oauth_token_secret";

/// Stored credential key of OAuth2 connectors
pub const ACCESS_TOKEN: &str = "access_token";

/// Map a failed token exchange to a connect error
fn exchange_error(provider: &str, step: &str, response: &HttpResponse) -> Error {
    if response.status >= 500 {
        Error::unreachable(format!("{} {} failed: HTTP {}", provider, step, response.status))
    } else {
        Error::auth_rejected(format!("{} refused the {}: HTTP {}", provider, step, response.status))
    }
}

/// Decode an `application/x-www-form-urlencoded` body
fn form_fields(body: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body.trim().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Three-legged OAuth 1.0a
#[derive(Clone)]
pub struct OAuth1Flow {
    pub provider: &'static str,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
    pub callback_url: String,
    /// Extra fields of the access-token response kept in the credentials
    pub keep_fields: &'static [&'static str],
}

impl std::fmt::Debug for OAuth1Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Flow")
            .field("provider", &self.provider)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<REDACTED>")
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

impl OAuth1Flow {
    /// Request signing material for stored credentials
    pub fn signing(&self, credentials: &Credentials) -> Result<RequestAuth> {
        Ok(RequestAuth::OAuth1(
            OAuth1Params::new(&self.consumer_key, &self.consumer_secret)
                .with_token(credentials.require(TOKEN)?, credentials.require(TOKEN_SECRET)?),
        ))
    }

    /// Run the step matching the callback parameters present
    pub async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        let token = optional_parameter(context.parameters, TOKEN);
        let verifier = optional_parameter(context.parameters, "oauth_verifier");

        match (token, verifier) {
            (Some(token), Some(verifier)) => {
                let pending = context.pending.ok_or_else(|| {
                    Error::auth_rejected(format!("no {} request token is pending", self.provider))
                })?;
                if pending.get(TOKEN) != Some(token) {
                    return Err(Error::auth_rejected(format!(
                        "{} callback does not match the pending request token",
                        self.provider
                    )));
                }
                let credentials = self
                    .access_token(session, token, pending.require(TOKEN_SECRET)?, verifier)
                    .await?;
                Ok(ConnectOutcome::Connected(credentials))
            }
            _ => self.request_token(session).await,
        }
    }

    async fn request_token(&self, session: &dyn HttpSession) -> Result<ConnectOutcome> {
        let params = OAuth1Params::new(&self.consumer_key, &self.consumer_secret)
            .with_callback(&self.callback_url);
        let response = session
            .send(HttpRequest::post(&self.request_token_url).auth(RequestAuth::OAuth1(params)))
            .await?;
        if !response.is_success() {
            return Err(exchange_error(self.provider, "request token", &response));
        }

        let fields = form_fields(&response.body);
        let (Some(token), Some(secret)) = (field(&fields, TOKEN), field(&fields, TOKEN_SECRET)) else {
            return Err(Error::auth_rejected(format!(
                "{} returned no request token",
                self.provider
            )));
        };

        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| Error::config(format!("Invalid authorize URL: {}", e)))?;
        url.query_pairs_mut().append_pair(TOKEN, token);
        debug!(provider = self.provider, "Obtained request token");

        Ok(ConnectOutcome::Redirect {
            url: url.to_string(),
            pending: Some(Credentials::new().with(TOKEN, token).with(TOKEN_SECRET, secret)),
        })
    }

    async fn access_token(
        &self,
        session: &dyn HttpSession,
        token: &str,
        token_secret: &str,
        verifier: &str,
    ) -> Result<Credentials> {
        let params = OAuth1Params::new(&self.consumer_key, &self.consumer_secret)
            .with_token(token, token_secret)
            .with_verifier(verifier);
        let response = session
            .send(HttpRequest::post(&self.access_token_url).auth(RequestAuth::OAuth1(params)))
            .await?;
        if !response.is_success() {
            return Err(exchange_error(self.provider, "access token exchange", &response));
        }

        let fields = form_fields(&response.body);
        let (Some(token), Some(secret)) = (field(&fields, TOKEN), field(&fields, TOKEN_SECRET)) else {
            return Err(Error::auth_rejected(format!(
                "{} failed to return an access token",
                self.provider
            )));
        };

        let mut credentials = Credentials::new().with(TOKEN, token).with(TOKEN_SECRET, secret);
        for key in self.keep_fields {
            let value = field(&fields, key).ok_or_else(|| {
                Error::auth_rejected(format!("{} access token lacks '{}'", self.provider, key))
            })?;
            credentials.insert(*key, value);
        }
        Ok(credentials)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Authorization-code OAuth2
#[derive(Clone)]
pub struct OAuth2Flow {
    pub provider: &'static str,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: &'static [&'static str],
}

impl std::fmt::Debug for OAuth2Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Flow")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl OAuth2Flow {
    /// Provider page where the user grants access
    pub fn authorization_url(&self) -> String {
        let mut url = match Url::parse(&self.authorize_url) {
            Ok(url) => url,
            Err(_) => return self.authorize_url.clone(),
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code");
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
        }
        url.to_string()
    }

    pub fn signing(&self, credentials: &Credentials) -> Result<RequestAuth> {
        Ok(RequestAuth::Bearer(credentials.require(ACCESS_TOKEN)?.to_string()))
    }

    /// Redirect without a `code`, exchange it otherwise
    pub async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        if let Some(error) = optional_parameter(context.parameters, "error") {
            return Err(Error::auth_rejected(format!(
                "{} authorization denied: {}",
                self.provider, error
            )));
        }
        let Some(code) = optional_parameter(context.parameters, "code") else {
            return Ok(ConnectOutcome::Redirect {
                url: self.authorization_url(),
                pending: None,
            });
        };

        let request = HttpRequest::post(&self.token_url)
            .header("Accept", "application/json")
            .form("grant_type", "authorization_code")
            .form("code", code)
            .form("client_id", self.client_id.as_str())
            .form("client_secret", self.client_secret.as_str())
            .form("redirect_uri", self.redirect_uri.as_str());
        let response = session.send(request).await?;
        if !response.is_success() {
            return Err(exchange_error(self.provider, "code exchange", &response));
        }

        let token: TokenResponse = response.json().map_err(|_| {
            Error::auth_rejected(format!("{} returned an unreadable token response", self.provider))
        })?;
        match token.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => {
                debug!(provider = self.provider, "Received access token");
                Ok(ConnectOutcome::Connected(
                    Credentials::new().with(ACCESS_TOKEN, access_token),
                ))
            }
            None => Err(Error::auth_rejected(format!(
                "{} failed to return an access token: {}",
                self.provider,
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "no reason given".to_string())
            ))),
        }
    }
}
