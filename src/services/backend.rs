//! The backend collaborator: ingest, listing and storage config.
//!
//! `BackendApi` is the seam the rest of the crate depends on; `HttpBackend`
//! is the `reqwest` implementation used by the binary.

use crate::models::{event::TimelineEvent, media::SelectedFile, remote_config::RemoteConfig};
use async_trait::async_trait;
use reqwest::{Client, Response, multipart};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

pub const PROCESS_ENDPOINT: &str = "/api/process";
pub const UPLOAD_ENDPOINT: &str = "/api/upload";
pub const EVENTS_ENDPOINT: &str = "/api/events";
pub const S3_CONFIG_ENDPOINT: &str = "/api/s3-config";
pub const IMAGE_ENDPOINT: &str = "/api/image";
pub const TRUNCATE_ENDPOINT: &str = "/api/truncate-events";
pub const HEALTH_ENDPOINT: &str = "/health";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("invalid response body from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Base URL without a trailing slash.
    fn base_url(&self) -> &str;

    /// `POST /api/process {text}`: ingest a text moment.
    async fn process_text(&self, text: &str) -> ApiResult<TimelineEvent>;

    /// `POST /api/upload` (multipart `file`, `caption`): ingest a media moment.
    async fn upload(&self, file: &SelectedFile, caption: &str) -> ApiResult<TimelineEvent>;

    /// `GET /api/events`: newest first.
    async fn events(&self) -> ApiResult<Vec<TimelineEvent>>;

    /// `GET /api/s3-config`
    async fn s3_config(&self) -> ApiResult<RemoteConfig>;

    /// `POST /api/truncate-events`: destructive, debug only.
    async fn truncate_events(&self) -> ApiResult<()>;

    /// `GET /health`
    async fn health(&self) -> ApiResult<()>;
}

#[derive(Serialize)]
struct ProcessTextRequest<'a> {
    text: &'a str,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn process_text(&self, text: &str) -> ApiResult<TimelineEvent> {
        let response = self
            .client
            .post(self.url(PROCESS_ENDPOINT))
            .json(&ProcessTextRequest { text })
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: PROCESS_ENDPOINT,
                source,
            })?;

        handle_json(PROCESS_ENDPOINT, response).await
    }

    async fn upload(&self, file: &SelectedFile, caption: &str) -> ApiResult<TimelineEvent> {
        let part = multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(file.content_type())
            .map_err(|source| ApiError::Transport {
                endpoint: UPLOAD_ENDPOINT,
                source,
            })?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("caption", caption.to_string());

        debug!(file = %file.name, size = file.bytes.len(), "uploading media moment");
        let response = self
            .client
            .post(self.url(UPLOAD_ENDPOINT))
            .multipart(form)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: UPLOAD_ENDPOINT,
                source,
            })?;

        handle_json(UPLOAD_ENDPOINT, response).await
    }

    async fn events(&self) -> ApiResult<Vec<TimelineEvent>> {
        let response = self
            .client
            .get(self.url(EVENTS_ENDPOINT))
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: EVENTS_ENDPOINT,
                source,
            })?;

        handle_json(EVENTS_ENDPOINT, response).await
    }

    async fn s3_config(&self) -> ApiResult<RemoteConfig> {
        let response = self
            .client
            .get(self.url(S3_CONFIG_ENDPOINT))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: S3_CONFIG_ENDPOINT,
                source,
            })?;

        handle_json(S3_CONFIG_ENDPOINT, response).await
    }

    async fn truncate_events(&self) -> ApiResult<()> {
        let response = self
            .client
            .post(self.url(TRUNCATE_ENDPOINT))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: TRUNCATE_ENDPOINT,
                source,
            })?;

        ensure_success(TRUNCATE_ENDPOINT, &response)
    }

    async fn health(&self) -> ApiResult<()> {
        let response = self
            .client
            .get(self.url(HEALTH_ENDPOINT))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: HEALTH_ENDPOINT,
                source,
            })?;

        ensure_success(HEALTH_ENDPOINT, &response)
    }
}

fn ensure_success(endpoint: &'static str, response: &Response) -> ApiResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ApiError::Status {
            endpoint,
            status: status.as_u16(),
        })
    }
}

async fn handle_json<T: DeserializeOwned>(endpoint: &'static str, response: Response) -> ApiResult<T> {
    ensure_success(endpoint, &response)?;
    response
        .json()
        .await
        .map_err(|source| ApiError::Decode { endpoint, source })
}
