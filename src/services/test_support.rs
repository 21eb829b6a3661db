//! In-memory backend for unit tests.

use crate::{
    models::{event::TimelineEvent, media::SelectedFile, remote_config::RemoteConfig},
    services::backend::{
        ApiError, ApiResult, BackendApi, EVENTS_ENDPOINT, PROCESS_ENDPOINT, S3_CONFIG_ENDPOINT,
        UPLOAD_ENDPOINT,
    },
};
use async_trait::async_trait;
use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Counts calls and serves canned data. A missing config answers 503.
#[derive(Default)]
pub struct MockBackend {
    config: Mutex<Option<RemoteConfig>>,
    config_delay: Duration,
    config_calls: AtomicUsize,
    events: Mutex<Vec<TimelineEvent>>,
    events_calls: AtomicUsize,
    fail_events: AtomicBool,
    submitted: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn with_config(self, config: RemoteConfig) -> Self {
        self.set_config(Some(config));
        self
    }

    pub fn with_config_delay(mut self, delay: Duration) -> Self {
        self.config_delay = delay;
        self
    }

    pub fn with_events(self, events: Vec<TimelineEvent>) -> Self {
        self.set_events(events);
        self
    }

    pub fn set_config(&self, config: Option<RemoteConfig>) {
        *self.config.lock().unwrap() = config;
    }

    pub fn set_events(&self, events: Vec<TimelineEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn events_calls(&self) -> usize {
        self.events_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

pub fn text_event(id: i64, summary: &str) -> TimelineEvent {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "kind": "text",
        "source": summary,
        "summary": summary,
        "labels": "test",
        "processing_status": "pending",
    }))
    .unwrap()
}

#[async_trait]
impl BackendApi for MockBackend {
    fn base_url(&self) -> &str {
        "http://backend.test"
    }

    async fn process_text(&self, text: &str) -> ApiResult<TimelineEvent> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(text.to_string());
        if text.contains("reject") {
            return Err(ApiError::Status {
                endpoint: PROCESS_ENDPOINT,
                status: 500,
            });
        }
        Ok(text_event(submitted.len() as i64, text))
    }

    async fn upload(&self, file: &SelectedFile, caption: &str) -> ApiResult<TimelineEvent> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(format!("{}:{}", file.name, caption));
        if file.bytes.is_empty() {
            return Err(ApiError::Status {
                endpoint: UPLOAD_ENDPOINT,
                status: 400,
            });
        }
        Ok(text_event(submitted.len() as i64, caption))
    }

    async fn events(&self) -> ApiResult<Vec<TimelineEvent>> {
        self.events_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                endpoint: EVENTS_ENDPOINT,
                status: 502,
            });
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn s3_config(&self) -> ApiResult<RemoteConfig> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        let config = self.config.lock().unwrap().clone();
        if !self.config_delay.is_zero() {
            tokio::time::sleep(self.config_delay).await;
        }
        config.ok_or(ApiError::Status {
            endpoint: S3_CONFIG_ENDPOINT,
            status: 503,
        })
    }

    async fn truncate_events(&self) -> ApiResult<()> {
        self.events.lock().unwrap().clear();
        Ok(())
    }

    async fn health(&self) -> ApiResult<()> {
        Ok(())
    }
}
