//! Gitea REST API (v1) client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{check_response, SourceClient};
use crate::errors::RemoteError;
use crate::models::{ItemKind, ItemState, SourceItem};

const REPO_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct GiteaIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GiteaLabel>,
    pub updated_at: DateTime<Utc>,
    /// Present (non-null) only for pull requests.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiteaLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiteaRepository {
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

impl From<GiteaIssue> for SourceItem {
    fn from(issue: GiteaIssue) -> Self {
        let kind = if issue.pull_request.as_ref().is_some_and(|v| !v.is_null()) {
            ItemKind::PullRequest
        } else {
            ItemKind::Issue
        };
        SourceItem {
            id: issue.id,
            number: issue.number,
            kind,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            state: ItemState::from_str_val(&issue.state),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            updated_at: issue.updated_at,
        }
    }
}

/// Asynchronous Gitea client scoped to one organization.
#[derive(Clone)]
pub struct GiteaClient {
    http: reqwest::Client,
    api_url: String,
    organization: String,
    token: String,
}

impl GiteaClient {
    pub fn new(
        base_url: &str,
        organization: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let api_url = format!("{}/api/v1", base_url.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("tracksync/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        info!(api_url = %api_url, "created GiteaClient");
        Ok(Self {
            http,
            api_url,
            organization: organization.into(),
            token: token.into(),
        })
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.token)
    }

    /// Server version, used by `tracksync validate` as a connectivity check.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<String, RemoteError> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }
        let url = format!("{}/version", self.api_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let v: Version = check_response(resp).await?.json().await?;
        Ok(v.version)
    }
}

/// Whether another page follows the one just read.
///
/// Gitea silently caps `limit` at its `MAX_RESPONSE_ITEMS`, so a page shorter
/// than requested does not mark the end. The `Link` header is authoritative
/// when present; without it paging continues until a page comes back empty.
fn has_next_page(link: Option<&str>, returned: usize) -> bool {
    match link {
        Some(link) => link
            .split(',')
            .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\"")),
        None => returned > 0,
    }
}

fn link_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Build the issue-listing query for one page.
fn issue_query(page: u32, page_size: u32, include_pull_requests: bool) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("state", "all".to_string()),
        ("page", page.to_string()),
        ("limit", page_size.to_string()),
    ];
    if !include_pull_requests {
        query.push(("type", "issues".to_string()));
    }
    query
}

#[async_trait]
impl SourceClient for GiteaClient {
    fn namespace(&self) -> &str {
        &self.organization
    }

    #[instrument(skip(self), fields(org = %self.organization))]
    async fn list_repositories(&self) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/orgs/{}/repos", self.api_url, self.organization);
        let mut names = Vec::new();
        let mut page = 1u32;
        loop {
            let resp = self
                .http
                .get(&url)
                .header("Authorization", self.auth_header())
                .query(&[("page", page.to_string()), ("limit", REPO_PAGE_SIZE.to_string())])
                .send()
                .await?;
            let resp = check_response(resp).await?;
            let link = link_header(&resp);
            let repos: Vec<GiteaRepository> = resp.json().await?;
            let fetched = repos.len();
            names.extend(repos.into_iter().filter(|r| !r.archived).map(|r| r.name));
            if !has_next_page(link.as_deref(), fetched) {
                break;
            }
            page += 1;
        }
        debug!(count = names.len(), "listed repositories");
        Ok(names)
    }

    #[instrument(skip(self), fields(org = %self.organization))]
    async fn list_items(
        &self,
        repo: &str,
        page: u32,
        page_size: u32,
        include_pull_requests: bool,
    ) -> Result<(Vec<SourceItem>, bool), RemoteError> {
        let url = format!("{}/repos/{}/{}/issues", self.api_url, self.organization, repo);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .query(&issue_query(page, page_size, include_pull_requests))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let link = link_header(&resp);
        let issues: Vec<GiteaIssue> = resp.json().await?;
        let has_more = has_next_page(link.as_deref(), issues.len());
        let items: Vec<SourceItem> = issues
            .into_iter()
            .map(SourceItem::from)
            .filter(|item| include_pull_requests || item.kind == ItemKind::Issue)
            .collect();
        debug!(repo, page, count = items.len(), has_more, "fetched items");
        Ok((items, has_more))
    }
}
