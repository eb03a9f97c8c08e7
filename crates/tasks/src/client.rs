//! Typed HTTP client for the external task service.
//!
//! Bearer-authenticated JSON over the open API. A 401 triggers exactly one
//! token refresh and retry; every other error maps to the domain error type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use ha_domain::config::TasksConfig;
use ha_domain::error::{Error, Result};

use crate::agent::ToolExecutor;
use crate::oauth::OAuthSession;

/// Task status value the service uses for "completed".
const STATUS_COMPLETED: i64 = 2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub priority: i64,
    /// Injected project name for aggregated listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A project together with its tasks and kanban columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectData {
    pub project: Project,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Fields for a new task.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bearer-authenticated client over the task service's CRUD surface.
pub struct TaskServiceClient {
    base_url: String,
    http: reqwest::Client,
    auth: Arc<OAuthSession>,
}

impl TaskServiceClient {
    pub fn new(cfg: &TasksConfig, auth: Arc<OAuthSession>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            http,
            auth,
        })
    }

    /// Issue an authenticated request; on 401 refresh the token once and retry.
    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let token = self.auth.access_token().await?;

        let mut resp = self.send(method.clone(), &url, &token, body).await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!(endpoint, "task service returned 401, refreshing token");
            let token = self.auth.refresh_access_token().await?;
            resp = self.send(method, &url, &token, body).await?;
        }

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "task service {endpoint} returned HTTP {status}: {text}"
            )));
        }
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(Error::from)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| Error::Http(e.to_string()))
    }

    // ── CRUD surface ───────────────────────────────────────────────

    pub async fn get_projects(&self) -> Result<Vec<Project>> {
        let value = self.request(reqwest::Method::GET, "project", None).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Project with its tasks and columns.
    pub async fn get_project_data(&self, project_id: &str) -> Result<ProjectData> {
        let value = self
            .request(
                reqwest::Method::GET,
                &format!("project/{project_id}/data"),
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Open tasks aggregated across all non-closed projects, with project
    /// names injected.
    pub async fn get_all_tasks(&self, include_completed: bool) -> Result<Vec<Task>> {
        let mut all = Vec::new();
        for project in self.get_projects().await? {
            if project.closed {
                continue;
            }
            let data = match self.get_project_data(&project.id).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(project = %project.name, error = %e, "skipping project");
                    continue;
                }
            };
            for mut task in data.tasks {
                if !include_completed && task.is_completed() {
                    continue;
                }
                task.project_id.get_or_insert_with(|| project.id.clone());
                task.project_name = Some(project.name.clone());
                all.push(task);
            }
        }
        Ok(all)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let value = self
            .request(reqwest::Method::GET, &format!("task/{task_id}"), None)
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    pub async fn create_task(&self, new: &NewTask) -> Result<Task> {
        let body = serde_json::to_value(new)?;
        let value = self
            .request(reqwest::Method::POST, "task", Some(&body))
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Read-modify-write update: only the provided fields change.
    pub async fn update_task(&self, task_id: &str, patch: &Value) -> Result<Task> {
        let mut current = serde_json::to_value(self.get_task(task_id).await?)?;
        if let (Some(current), Some(patch)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                current.insert(key.clone(), value.clone());
            }
        }
        let value = self
            .request(
                reqwest::Method::POST,
                &format!("task/{task_id}"),
                Some(&current),
            )
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    pub async fn complete_task(&self, task_id: &str) -> Result<Task> {
        self.update_task(task_id, &serde_json::json!({"status": STATUS_COMPLETED}))
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool surface for the sub-agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other(format!("missing required argument '{key}'")))
}

#[async_trait::async_trait]
impl ToolExecutor for TaskServiceClient {
    async fn execute(&self, tool: &str, args: &Value) -> Result<String> {
        let result = match tool {
            "get_projects" => serde_json::to_value(self.get_projects().await?)?,
            "get_project_data" => {
                serde_json::to_value(self.get_project_data(str_arg(args, "project_id")?).await?)?
            }
            "get_all_tasks" => {
                let include_completed = args
                    .get("include_completed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                serde_json::to_value(self.get_all_tasks(include_completed).await?)?
            }
            "get_task_by_id" => {
                serde_json::to_value(self.get_task(str_arg(args, "task_id")?).await?)?
            }
            "create_task" => {
                let new = NewTask {
                    title: str_arg(args, "title")?.to_string(),
                    project_id: str_arg(args, "project_id")?.to_string(),
                    content: args
                        .get("content")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    due_date: args
                        .get("due_date")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    priority: args.get("priority").and_then(|v| v.as_i64()).unwrap_or(0),
                };
                serde_json::to_value(self.create_task(&new).await?)?
            }
            "update_task" => {
                let task_id = str_arg(args, "task_id")?;
                let mut patch = args.clone();
                if let Some(obj) = patch.as_object_mut() {
                    obj.remove("task_id");
                }
                serde_json::to_value(self.update_task(task_id, &patch).await?)?
            }
            "complete_task" => {
                serde_json::to_value(self.complete_task(str_arg(args, "task_id")?).await?)?
            }
            other => return Err(Error::Other(format!("unknown tool '{other}'"))),
        };
        Ok(serde_json::to_string_pretty(&result)?)
    }

    fn describe_tools(&self) -> String {
        // Rendered into the sub-agent's prompt.
        "Available tools:\n\n  \
         get_projects: List all projects.\n    (no parameters)\n\n  \
         get_project_data: Fetch one project with its tasks and columns.\n    \
         - project_id (required)\n\n  \
         get_all_tasks: List open tasks across all projects.\n    \
         - include_completed: include completed tasks (default false)\n\n  \
         get_task_by_id: Fetch one task.\n    - task_id (required)\n\n  \
         create_task: Create a task.\n    - title (required)\n    \
         - project_id (required)\n    - content: notes\n    \
         - due_date: ISO 8601 (e.g. 2026-02-20T09:00:00+0000)\n    \
         - priority: 0=none 1=low 3=medium 5=high\n\n  \
         update_task: Update fields of a task.\n    - task_id (required)\n    \
         - title / content / status / priority / due_date\n\n  \
         complete_task: Mark a task completed.\n    - task_id (required)\n"
            .to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
