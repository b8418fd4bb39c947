//! Kimai REST API client.
//!
//! Projects are the containers, activities the mirrored entities. Kimai
//! activities carry no modification time, so [`SinkEntity::updated_at`] is
//! always `None` for this sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{check_response, SinkClient};
use crate::activity::has_external_ref;
use crate::errors::RemoteError;
use crate::models::{ActivityFields, SinkEntity};

/// How requests are authenticated.
#[derive(Clone)]
pub enum KimaiAuth {
    /// API token sent as a bearer token.
    Token(String),
    /// HTTP basic authentication.
    Basic { username: String, password: String },
}

impl std::fmt::Debug for KimaiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => write!(f, "Token(***)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KimaiProject {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KimaiActivity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Either a bare project id or an embedded project object.
    #[serde(default)]
    pub project: Option<serde_json::Value>,
}

fn default_visible() -> bool {
    true
}

impl KimaiActivity {
    fn project_id(&self) -> Option<i64> {
        match self.project.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::Object(o) => o.get("id").and_then(|v| v.as_i64()),
            _ => None,
        }
    }

    fn into_entity(self, fallback_project: Option<&str>) -> SinkEntity {
        let project_key = self
            .project_id()
            .map(|id| id.to_string())
            .or_else(|| fallback_project.map(str::to_string))
            .unwrap_or_default();
        SinkEntity {
            id: self.id,
            project_key,
            name: self.name,
            comment: self.comment.unwrap_or_default(),
            visible: self.visible,
            updated_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActivityPayload<'a> {
    name: &'a str,
    comment: &'a str,
    visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i64,
}

fn parse_project_key(project_key: &str) -> Result<i64, RemoteError> {
    project_key
        .parse::<i64>()
        .map_err(|_| RemoteError::Validation(format!("invalid project key '{}'", project_key)))
}

/// Asynchronous Kimai client.
#[derive(Clone)]
pub struct KimaiClient {
    http: reqwest::Client,
    api_url: String,
    auth: KimaiAuth,
    customer_id: Option<i64>,
}

impl KimaiClient {
    pub fn new(base_url: &str, auth: KimaiAuth, customer_id: Option<i64>) -> Result<Self, RemoteError> {
        let api_url = format!("{}/api", base_url.trim_end_matches('/'));
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
        info!(api_url = %api_url, auth = ?auth, "created KimaiClient");
        Ok(Self {
            http,
            api_url,
            auth,
            customer_id,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.api_url, path));
        match &self.auth {
            KimaiAuth::Token(token) => req.bearer_auth(token),
            KimaiAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
        }
    }

    /// Server version, used by `tracksync validate` as a connectivity check.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<String, RemoteError> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }
        let resp = self.request(reqwest::Method::GET, "/version").send().await?;
        let v: Version = check_response(resp).await?.json().await?;
        Ok(v.version)
    }

    async fn list_projects(&self) -> Result<Vec<KimaiProject>, RemoteError> {
        let resp = self
            .request(reqwest::Method::GET, "/projects")
            .query(&[("visible", "3")])
            .send()
            .await?;
        Ok(check_response(resp).await?.json().await?)
    }
}

#[async_trait]
impl SinkClient for KimaiClient {
    #[instrument(skip(self))]
    async fn find_project(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let projects = self.list_projects().await?;
        let found = projects
            .into_iter()
            .find(|p| p.name.to_lowercase() == name.to_lowercase())
            .map(|p| p.id.to_string());
        debug!(name, found = ?found, "project lookup");
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn project_exists(&self, project_key: &str) -> Result<bool, RemoteError> {
        let id = parse_project_key(project_key)?;
        let resp = self
            .request(reqwest::Method::GET, &format!("/projects/{}", id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(resp).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn create_project(&self, name: &str) -> Result<String, RemoteError> {
        let mut body = serde_json::json!({
            "name": name,
            "comment": format!("Created by tracksync for repository {}", name),
            "visible": true,
        });
        if let Some(customer) = self.customer_id {
            body["customer"] = serde_json::json!(customer);
        }
        let resp = self
            .request(reqwest::Method::POST, "/projects")
            .json(&body)
            .send()
            .await?;
        let created: Created = check_response(resp).await?.json().await?;
        info!(name, id = created.id, "created project");
        Ok(created.id.to_string())
    }

    #[instrument(skip(self))]
    async fn find_entity(
        &self,
        project_key: &str,
        external_ref: &str,
    ) -> Result<Option<SinkEntity>, RemoteError> {
        let project = parse_project_key(project_key)?;
        let resp = self
            .request(reqwest::Method::GET, "/activities")
            .query(&[("project", project.to_string()), ("visible", "3".to_string())])
            .send()
            .await?;
        let activities: Vec<KimaiActivity> = check_response(resp).await?.json().await?;
        let found = activities
            .into_iter()
            .find(|a| a.comment.as_deref().is_some_and(|c| has_external_ref(c, external_ref)))
            .map(|a| a.into_entity(Some(project_key)));
        debug!(project_key, external_ref, found = found.is_some(), "activity lookup");
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn get_entity(&self, entity_id: i64) -> Result<Option<SinkEntity>, RemoteError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/activities/{}", entity_id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(entity_id, "activity no longer exists");
            return Ok(None);
        }
        let activity: KimaiActivity = check_response(resp).await?.json().await?;
        Ok(Some(activity.into_entity(None)))
    }

    #[instrument(skip(self, activity), fields(name = %activity.name))]
    async fn create_entity(
        &self,
        project_key: &str,
        activity: &ActivityFields,
    ) -> Result<i64, RemoteError> {
        let payload = ActivityPayload {
            name: &activity.name,
            comment: &activity.comment,
            visible: activity.visible,
            project: Some(parse_project_key(project_key)?),
        };
        let resp = self
            .request(reqwest::Method::POST, "/activities")
            .json(&payload)
            .send()
            .await?;
        let created: Created = check_response(resp).await?.json().await?;
        info!(id = created.id, project_key, "created activity");
        Ok(created.id)
    }

    #[instrument(skip(self, activity), fields(name = %activity.name))]
    async fn update_entity(&self, entity_id: i64, activity: &ActivityFields) -> Result<(), RemoteError> {
        let payload = ActivityPayload {
            name: &activity.name,
            comment: &activity.comment,
            visible: activity.visible,
            project: None,
        };
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/activities/{}", entity_id))
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        info!(entity_id, "updated activity");
        Ok(())
    }
}
