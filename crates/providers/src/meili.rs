//! Minimal Meilisearch REST client: index lifecycle, documents, tasks, search.
//!
//! Every write endpoint is asynchronous on the server side and answers with a
//! task summary; callers poll [`MeiliClient::wait_for_task`] to learn whether the
//! write was applied.

use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct MeiliConfig {
    pub host: String,
    pub index: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct MeiliClient {
    client: Client,
    cfg: MeiliConfig,
}

/// Summary returned by every write endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_uid: u64,
    #[serde(default)]
    pub index_uid: Option<String>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskView {
    pub uid: u64,
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<serde_json::Value>,
}

impl MeiliClient {
    pub fn new(cfg: MeiliConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.host.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cfg.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let resp = self.authorized(builder).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(ProviderError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(resp)
    }

    async fn send_task(&self, builder: RequestBuilder) -> Result<TaskInfo, ProviderError> {
        let resp = self.send(builder).await?;
        Ok(resp.json().await?)
    }

    /// Returns false when the server reports the index as missing.
    pub async fn index_exists(&self) -> Result<bool, ProviderError> {
        let builder = self
            .client
            .get(self.url(&format!("/indexes/{}", self.cfg.index)));
        let resp = self.authorized(builder).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(ProviderError::Status {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    pub async fn create_index(&self, primary_key: &str) -> Result<TaskInfo, ProviderError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateIndex<'a> {
            uid: &'a str,
            primary_key: &'a str,
        }
        let body = CreateIndex {
            uid: &self.cfg.index,
            primary_key,
        };
        self.send_task(self.client.post(self.url("/indexes")).json(&body))
            .await
    }

    pub async fn update_searchable_attributes(
        &self,
        fields: &[&str],
    ) -> Result<TaskInfo, ProviderError> {
        let url = self.url(&format!(
            "/indexes/{}/settings/searchable-attributes",
            self.cfg.index
        ));
        self.send_task(self.client.put(url).json(&fields)).await
    }

    /// Adds or replaces documents by primary key.
    pub async fn add_documents<T: Serialize + Sync>(
        &self,
        docs: &[T],
        primary_key: &str,
    ) -> Result<TaskInfo, ProviderError> {
        let url = self.url(&format!("/indexes/{}/documents", self.cfg.index));
        self.send_task(
            self.client
                .post(url)
                .query(&[("primaryKey", primary_key)])
                .json(docs),
        )
        .await
    }

    pub async fn delete_document(&self, id: &str) -> Result<TaskInfo, ProviderError> {
        let url = self.url(&format!("/indexes/{}/documents/{}", self.cfg.index, id));
        self.send_task(self.client.delete(url)).await
    }

    pub async fn get_task(&self, uid: u64) -> Result<TaskView, ProviderError> {
        let resp = self
            .send(self.client.get(self.url(&format!("/tasks/{}", uid))))
            .await?;
        Ok(resp.json().await?)
    }

    /// Polls until the task reaches a terminal state or `timeout` elapses.
    /// A failed or canceled task is reported as an error.
    pub async fn wait_for_task(
        &self,
        uid: u64,
        timeout: Duration,
    ) -> Result<TaskView, ProviderError> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.get_task(uid).await?;
            match task.status {
                TaskStatus::Succeeded => return Ok(task),
                TaskStatus::Failed | TaskStatus::Canceled => {
                    let message = task
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| format!("{:?}", task.status));
                    return Err(ProviderError::TaskFailed { uid, message });
                }
                TaskStatus::Enqueued | TaskStatus::Processing => {}
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::TaskTimeout { uid, timeout });
            }
            sleep(TASK_POLL_INTERVAL).await;
        }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        #[derive(Serialize)]
        struct SearchRequest<'a> {
            q: &'a str,
            limit: usize,
        }
        let url = self.url(&format!("/indexes/{}/search", self.cfg.index));
        let resp = self
            .send(self.client.post(url).json(&SearchRequest { q: query, limit }))
            .await?;
        let parsed: SearchResponse = resp.json().await?;
        Ok(parsed.hits)
    }
}
