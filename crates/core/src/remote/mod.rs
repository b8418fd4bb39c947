//! Remote collaborators: the issue source and the activity sink.
//!
//! The engine only talks to the [`SourceClient`] and [`SinkClient`] traits.
//! [`gitea::GiteaClient`] and [`kimai::KimaiClient`] are the HTTP
//! implementations used by the binaries; tests plug in in-process fakes.

pub mod gitea;
pub mod kimai;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::errors::{ConfigError, CoreError, RemoteError};
use crate::models::{ActivityFields, SinkEntity, SourceItem};

pub use gitea::GiteaClient;
pub use kimai::{KimaiAuth, KimaiClient};

/// Paged read access to the Git-hosting side.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Owner of the synchronized repositories (organization or user).
    fn namespace(&self) -> &str;

    /// All repositories visible under [`namespace`](Self::namespace).
    async fn list_repositories(&self) -> Result<Vec<String>, RemoteError>;

    /// One page (1-based) of issues, plus pull requests when requested.
    /// The flag is `true` while further pages may exist.
    async fn list_items(
        &self,
        repo: &str,
        page: u32,
        page_size: u32,
        include_pull_requests: bool,
    ) -> Result<(Vec<SourceItem>, bool), RemoteError>;
}

/// Write access to the time-tracking side.
#[async_trait]
pub trait SinkClient: Send + Sync {
    /// Case-insensitive project lookup by name.
    async fn find_project(&self, name: &str) -> Result<Option<String>, RemoteError>;

    /// Whether a project with this key exists.
    async fn project_exists(&self, project_key: &str) -> Result<bool, RemoteError>;

    async fn create_project(&self, name: &str) -> Result<String, RemoteError>;

    /// Find an activity in `project_key` carrying `external_ref`.
    async fn find_entity(
        &self,
        project_key: &str,
        external_ref: &str,
    ) -> Result<Option<SinkEntity>, RemoteError>;

    /// Current state of an activity, `None` when it was deleted.
    async fn get_entity(&self, entity_id: i64) -> Result<Option<SinkEntity>, RemoteError>;

    async fn create_entity(
        &self,
        project_key: &str,
        fields: &ActivityFields,
    ) -> Result<i64, RemoteError>;

    async fn update_entity(&self, entity_id: i64, fields: &ActivityFields) -> Result<(), RemoteError>;
}

/// Build both HTTP clients from a loaded configuration whose secrets have
/// been resolved. A Kimai token takes precedence over basic auth.
pub fn clients_from_config(config: &AppConfig) -> Result<(GiteaClient, KimaiClient), CoreError> {
    config.require_credentials()?;

    let token = config.gitea.token.clone().unwrap_or_default();
    let gitea = GiteaClient::new(&config.gitea.url, config.gitea.organization.clone(), token)?;

    let auth = match (&config.kimai.token, &config.kimai.username, &config.kimai.password) {
        (Some(token), _, _) => KimaiAuth::Token(token.clone()),
        (None, Some(username), Some(password)) => KimaiAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        _ => {
            return Err(ConfigError::EnvVarMissing {
                var: config.kimai.token_env.clone().unwrap_or_default(),
                field: "kimai.token_env".into(),
            }
            .into())
        }
    };
    let kimai = KimaiClient::new(&config.kimai.url, auth, config.kimai.customer_id)?;
    Ok((gitea, kimai))
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}

/// Turn a non-success response into a [`RemoteError`].
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(RemoteError::from_status(status.as_u16(), body, retry_after))
}
