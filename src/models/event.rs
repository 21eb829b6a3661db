//! Timeline entries ("moments") as listed by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::media::MediaReference;

/// What the user submitted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Image,
}

/// Progress of the backend's asynchronous annotation work.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    /// Older backends omit the field entirely; their events are complete.
    #[default]
    Completed,
    Failed,
}

/// One moment on the timeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TimelineEvent {
    pub id: i64,

    pub kind: EventKind,

    /// Raw text for text moments, the stored object key for image moments.
    #[serde(default)]
    pub source: Option<String>,

    /// AI-written summary.
    pub summary: String,

    /// Comma-separated keyword labels.
    #[serde(default)]
    pub labels: Option<String>,

    #[serde(default)]
    pub processing_status: ProcessingStatus,

    #[serde(default)]
    pub ai_results: Option<AiResults>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TimelineEvent {
    pub fn is_pending(&self) -> bool {
        self.processing_status == ProcessingStatus::Pending
    }

    /// The stored media key for image moments. Malformed keys are treated
    /// as absent so one bad row cannot break rendering.
    pub fn media_reference(&self) -> Option<MediaReference> {
        match self.kind {
            EventKind::Image => self
                .source
                .as_deref()
                .and_then(|key| MediaReference::new(key).ok()),
            EventKind::Text => None,
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.labels
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .collect()
    }
}

/// Annotations computed server-side. Every field is optional; unknown
/// fields are ignored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AiResults {
    #[serde(default)]
    pub event_type: Option<String>,

    #[serde(default)]
    pub faces: Vec<serde_json::Value>,

    #[serde(default)]
    pub ocr_text: Option<String>,

    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Location {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}
