// # GitHub Adapter
//
// Counts the user's commits across every repository they can access.
//
// ## Update flow
//
// 1. `GET /user` for the login name
// 2. `GET /user/repos` (following `Link: rel="next"`) to list repositories
// 3. One endpoint per repository:
//    `GET /repos/{full_name}/commits?author={login}&since={ISO8601}`
//
// Every repository feeds the single `Commits` set, one event per commit.
// An empty repository answers 409, which means "no commits" here rather
// than a rate limit.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hdsync_core::classifier::{Outcome, ResponseClassifier};
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, Credentials, MeasurementSetTemplate,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, Cursor, EndpointPlan, HttpRequest, HttpResponse, HttpSession,
    Page, ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Error, Result};
use serde::Deserialize;
use tracing::debug;

use crate::oauth::OAuth2Flow;
use crate::{connect_url, expect_success};

const NAME: &str = "github";
const API_BASE: &str = "https://api.github.com";
const AUTH_BASE: &str = "https://github.com";
const PER_PAGE: u32 = 100;

/// Upper bound on repository listing pages during planning
const MAX_REPO_PAGES: usize = 50;

const COMMITS: &str = "commits";

static TEMPLATES: &[MeasurementSetTemplate] = &[MeasurementSetTemplate::new(
    COMMITS,
    "Commits",
    "Activity",
    "event",
    CombinationOperation::Sum,
)];

/// URL of the `rel="next"` entry of a `Link` header
pub fn next_link(response: &HttpResponse) -> Option<String> {
    let header = response.header("link")?;
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        (is_next && target.starts_with('<') && target.ends_with('>'))
            .then(|| target[1..target.len() - 1].to_string())
    })
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    date: DateTime<Utc>,
}

/// GitHub adapter
#[derive(Debug)]
pub struct GithubAdapter {
    api_base: String,
    oauth: OAuth2Flow,
}

impl GithubAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let auth_base = config.api_base_or(AUTH_BASE);
        Ok(Self {
            api_base: config.api_base_or(API_BASE).to_string(),
            oauth: OAuth2Flow {
                provider: "GitHub",
                client_id: config.require_client_id()?.to_string(),
                client_secret: config.require_client_secret()?.to_string(),
                authorize_url: format!("{}/login/oauth/authorize", auth_base),
                token_url: format!("{}/login/oauth/access_token", auth_base),
                redirect_uri: connect_url(config, NAME),
                scopes: &["user", "repo"],
            },
        })
    }

    fn api_request(&self, url: impl Into<String>, credentials: &Credentials) -> Result<HttpRequest> {
        Ok(HttpRequest::get(url)
            .header("Accept", "application/vnd.github+json")
            .auth(self.oauth.signing(credentials)?))
    }

    async fn login(&self, session: &dyn HttpSession, credentials: &Credentials) -> Result<String> {
        let request = self.api_request(format!("{}/user", self.api_base), credentials)?;
        let response = session.send(request).await?;
        expect_success(&self.classifier(), &response, "GitHub user lookup")?;
        Ok(response.json::<User>()?.login)
    }

    async fn repositories(
        &self,
        session: &dyn HttpSession,
        credentials: &Credentials,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut request = self
            .api_request(format!("{}/user/repos", self.api_base), credentials)?
            .query("per_page", PER_PAGE);

        for _ in 0..MAX_REPO_PAGES {
            let response = session.send(request.clone()).await?;
            expect_success(&self.classifier(), &response, "GitHub repository listing")?;
            let repos: Vec<Repository> = response.json()?;
            names.extend(repos.into_iter().map(|r| r.full_name));

            match next_link(&response) {
                Some(next) => request = request.follow_up(next),
                None => break,
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl ProviderAdapter for GithubAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "GitHub"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.oauth.authorization_url(),
            parameters: Vec::new(),
            use_popup: true,
        }
    }

    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        self.oauth.connect(session, context).await
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    fn classifier(&self) -> ResponseClassifier {
        ResponseClassifier::standard().with_override(409, Outcome::Empty)
    }

    async fn plan(
        &self,
        session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let login = self.login(session, credentials).await?;
        let repositories = self.repositories(session, credentials).await?;
        debug!(repositories = repositories.len(), "Planning GitHub commit endpoints");

        let since = Utc
            .timestamp_opt(window.from_time, 0)
            .single()
            .ok_or_else(|| Error::transient(format!("invalid from_time {}", window.from_time)))?
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        repositories
            .into_iter()
            .map(|full_name| {
                let request = self
                    .api_request(format!("{}/repos/{}/commits", self.api_base, full_name), credentials)?
                    .query("author", &login)
                    .query("per_page", PER_PAGE)
                    .query("since", &since);
                Ok(EndpointPlan::new(format!("commits:{}", full_name), request).metrics([COMMITS]))
            })
            .collect()
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let commits: Vec<CommitEntry> = response.json()?;
        let records = commits
            .into_iter()
            .filter_map(|entry| entry.commit.author)
            .map(|author| RawRecord::new(COMMITS, author.date.timestamp(), 1.0))
            .collect();
        Ok(Page::new(records, next_link(response).map(Cursor::Url)))
    }
}

/// Factory for the GitHub adapter
pub struct GithubFactory;

impl AdapterFactory for GithubFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(GithubAdapter::new(config)?))
    }
}

/// Register the GitHub adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(GithubFactory));
}
