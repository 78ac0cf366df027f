//! HttpApiClient - reqwest ベースのバックエンドクライアント
//!
//! Endpoints (all `GET`, query parameters only):
//! - `/task_status?task_id=..`
//! - `/create_graph_11?keyword=..`
//! - `/create_graph_12?keyword=..&parent_id=..`

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CreateRequest, CreateResponse, StatusReport, TaskId};
use crate::ports::{GraphApi, ServiceError, TaskService};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Connection settings for the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,

    /// Upper bound for a single request. Keep it below the poll interval so a
    /// slow check never delays the next cycle.
    #[serde(with = "crate::config::millis")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(4),
        }
    }
}

/// HTTP client for the graph backend.
pub struct HttpApiClient {
    inner: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ServiceError> {
        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "GET request");

        let response = self
            .inner
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    fn map_send_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else {
            ServiceError::from(err)
        }
    }
}

#[async_trait]
impl TaskService for HttpApiClient {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<StatusReport, ServiceError> {
        self.get_json("/task_status", &[("task_id", task_id.as_str())])
            .await
    }
}

#[async_trait]
impl GraphApi for HttpApiClient {
    async fn create_graph(&self, request: &CreateRequest) -> Result<CreateResponse, ServiceError> {
        match request {
            CreateRequest::L1 { keyword } => {
                self.get_json("/create_graph_11", &[("keyword", keyword.as_str())])
                    .await
            }
            CreateRequest::L2 { keyword, parent_id } => {
                self.get_json(
                    "/create_graph_12",
                    &[("keyword", keyword.as_str()), ("parent_id", parent_id.as_str())],
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpApiClient {
        HttpApiClient::new(&ClientConfig {
            base_url: format!("{}/", server.uri()),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_status_decodes_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task_status"))
            .and(query_param("task_id", "t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "completed": true,
                "error": null,
                "result": {"graph_id": "g-9"},
                "message": "done",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = client_for(&server)
            .fetch_status(&TaskId::new("t-1"))
            .await
            .unwrap();

        assert!(report.completed);
        assert_eq!(report.message.as_deref(), Some("done"));
        assert_eq!(report.result, Some(serde_json::json!({"graph_id": "g-9"})));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task_status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_status(&TaskId::new("t-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Status { status: 503, ref endpoint } if endpoint == "/task_status"));
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task_status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_status(&TaskId::new("t-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task_status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"completed": false}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_status(&TaskId::new("t-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Timeout(d) if d == Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn create_l2_sends_parent_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/create_graph_12"))
            .and(query_param("keyword", "borrowing"))
            .and(query_param("parent_id", "g-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "task_id": "t-42",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .create_graph(&CreateRequest::l2("borrowing", "g-1"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.task_id, Some(TaskId::new("t-42")));
    }

    #[tokio::test]
    async fn create_l1_passes_through_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/create_graph_11"))
            .and(query_param("keyword", "rust"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "graph already exists",
            })))
            .mount(&server)
            .await;

        let response = client_for(&server)
            .create_graph(&CreateRequest::l1("rust"))
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("graph already exists"));
    }

    #[test]
    fn config_reads_millis() {
        let config: ClientConfig =
            serde_json::from_value(serde_json::json!({"request_timeout": 1500})).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
    }
}
