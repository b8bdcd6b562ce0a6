use std::sync::{Mutex, MutexGuard};

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{ApiError, CredentialStore, Credentials, OAuthClient, OAuthError, TokenExchange};

use super::types::{NewProject, NewTask, Project, ProjectData, Task, TaskUpdate};

pub const DEFAULT_BASE_URL: &str = "https://api.ticktick.com/open/v1";
pub const INBOX_PROJECT_ID: &str = "inbox";

const BASE_URL_VAR: &str = "TICKTICK_BASE_URL";

#[derive(Debug, Clone)]
struct TokenRefresher {
    exchange: TokenExchange,
    store: CredentialStore,
}

struct Tokens {
    access: String,
    refresh: Option<String>,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("refresh", &self.refresh.is_some())
            .finish_non_exhaustive()
    }
}

/// Authenticated client for the TickTick open API.
///
/// A 401 response triggers one refresh-and-retry when a refresh token and a
/// [`TokenExchange`] are available; otherwise the caller must re-authenticate.
#[derive(Debug)]
pub struct TickTickClient {
    http: Client,
    base_url: String,
    tokens: Mutex<Tokens>,
    refresher: Option<TokenRefresher>,
}

impl TickTickClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            tokens: Mutex::new(Tokens {
                access: access_token.into(),
                refresh: None,
            }),
            refresher: None,
        }
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self, ApiError> {
        let access_token = credentials.access_token().ok_or(ApiError::AuthRequired)?;
        let client = Self::new(access_token);
        client.lock_tokens().refresh = credentials.refresh_token().map(str::to_string);
        Ok(client)
    }

    /// Loads tokens from `store`. `TICKTICK_BASE_URL` overrides the API base.
    pub fn from_store(store: &CredentialStore) -> Result<Self, ApiError> {
        let credentials = store.load()?;
        let mut client = Self::from_credentials(&credentials)?;
        if let Some(base_url) = std::env::var(BASE_URL_VAR)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| credentials.non_empty(BASE_URL_VAR).map(str::to_string))
        {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enables refresh on 401 using the auth client's token endpoint and store.
    pub fn with_refresh(mut self, oauth: &OAuthClient) -> Self {
        self.refresher = Some(TokenRefresher {
            exchange: oauth.token_exchange().clone(),
            store: oauth.store().clone(),
        });
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn access_token(&self) -> String {
        self.lock_tokens().access.clone()
    }

    pub async fn get_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.get("/project").await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project, ApiError> {
        self.get(&format!("/project/{project_id}")).await
    }

    pub async fn get_project_with_data(&self, project_id: &str) -> Result<ProjectData, ApiError> {
        self.get(&format!("/project/{project_id}/data")).await
    }

    /// The inbox is not listed by `get_projects`.
    pub async fn get_inbox(&self) -> Result<ProjectData, ApiError> {
        self.get_project_with_data(INBOX_PROJECT_ID).await
    }

    pub async fn get_task(&self, project_id: &str, task_id: &str) -> Result<Task, ApiError> {
        self.get(&format!("/project/{project_id}/task/{task_id}"))
            .await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.send_json(Method::POST, "/task", Some(task)).await
    }

    pub async fn create_subtask(
        &self,
        parent_task_id: &str,
        mut subtask: NewTask,
    ) -> Result<Task, ApiError> {
        subtask.parent_id = Some(parent_task_id.to_string());
        self.create_task(&subtask).await
    }

    pub async fn update_task(&self, update: &TaskUpdate) -> Result<Task, ApiError> {
        self.send_json(Method::POST, &format!("/task/{}", update.id), Some(update))
            .await
    }

    pub async fn complete_task(&self, project_id: &str, task_id: &str) -> Result<(), ApiError> {
        self.send(
            Method::POST,
            &format!("/project/{project_id}/task/{task_id}/complete"),
            None,
        )
        .await
        .map(drop)
    }

    pub async fn delete_task(&self, project_id: &str, task_id: &str) -> Result<(), ApiError> {
        self.send(
            Method::DELETE,
            &format!("/project/{project_id}/task/{task_id}"),
            None,
        )
        .await
        .map(drop)
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        self.send_json(Method::POST, "/project", Some(project)).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, &format!("/project/{project_id}"), None)
            .await
            .map(drop)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json::<T, ()>(Method::GET, path, None).await
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        let text = self.send(method, path, body.as_ref()).await?;
        serde_json::from_str(&text).map_err(|err| ApiError::InvalidResponse {
            message: err.to_string(),
            body: text,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut refreshed = false;

        loop {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(self.access_token());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            debug!(%method, path, status = status.as_u16(), "api request finished");

            if status == StatusCode::UNAUTHORIZED {
                if !refreshed {
                    match self.refresh_access_token().await {
                        Ok(true) => {
                            refreshed = true;
                            continue;
                        }
                        Ok(false) => {}
                        // A rejected refresh token leaves the 401 standing.
                        Err(ApiError::Auth(OAuthError::TokenExchange { status, error, .. })) => {
                            warn!(status, error = ?error, "refresh token rejected");
                        }
                        Err(err) => return Err(err),
                    }
                }
                return Err(ApiError::Unauthorized { body: text });
            }

            if !status.is_success() {
                return Err(ApiError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            return Ok(text);
        }
    }

    /// Returns `false` when no refresh is possible.
    async fn refresh_access_token(&self) -> Result<bool, ApiError> {
        let Some(refresher) = &self.refresher else {
            return Ok(false);
        };
        let Some(refresh_token) = self.lock_tokens().refresh.clone() else {
            return Ok(false);
        };

        let tokens = refresher.exchange.refresh(&refresh_token).await?;
        if let Err(err) = refresher.store.save(&tokens) {
            warn!(error = %err, "refreshed access token could not be saved");
        }

        let mut current = self.lock_tokens();
        current.access = tokens.access_token;
        current.refresh = tokens.refresh_token;
        info!("access token refreshed");
        Ok(true)
    }

    fn lock_tokens(&self) -> MutexGuard<'_, Tokens> {
        // Tokens stay consistent even if a holder panicked.
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
