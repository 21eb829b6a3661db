//! Timeline controller: the feed, submissions, and post-submit polling.

use crate::{
    models::{
        event::{EventKind, ProcessingStatus, TimelineEvent},
        media::SelectedFile,
    },
    services::{
        backend::{ApiError, BackendApi},
        config_cache::AddressResolver,
        poll::{PollOptions, PollScheduler},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("text must not be empty")]
    EmptyText,
    #[error("a caption is required for media uploads")]
    EmptyCaption,
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One user's view of the timeline.
///
/// Every successful submission refreshes the feed immediately and then keeps
/// polling for a bounded window so server-side annotations show up without
/// user action.
pub struct TimelineSession {
    backend: Arc<dyn BackendApi>,
    resolver: Arc<AddressResolver>,
    scheduler: PollScheduler,
    poll_options: PollOptions,
    feed: Arc<watch::Sender<Vec<TimelineEvent>>>,
}

impl TimelineSession {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        resolver: Arc<AddressResolver>,
        poll_options: PollOptions,
    ) -> Self {
        let (feed, _) = watch::channel(Vec::new());
        Self {
            backend,
            resolver,
            scheduler: PollScheduler::new(),
            poll_options,
            feed: Arc::new(feed),
        }
    }

    pub fn feed(&self) -> watch::Receiver<Vec<TimelineEvent>> {
        self.feed.subscribe()
    }

    pub fn events(&self) -> Vec<TimelineEvent> {
        self.feed.borrow().clone()
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Re-read the feed. Returns the number of events listed.
    pub async fn refresh(&self) -> SessionResult<usize> {
        Ok(refresh_feed(self.backend.as_ref(), &self.feed).await?)
    }

    pub async fn submit_text(&self, text: &str) -> SessionResult<TimelineEvent> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyText);
        }

        let event = self.backend.process_text(text).await?;
        info!(event_id = event.id, "text moment submitted");
        self.after_mutation().await;
        Ok(event)
    }

    pub async fn submit_media(
        &self,
        file: &SelectedFile,
        caption: &str,
    ) -> SessionResult<TimelineEvent> {
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(SessionError::EmptyCaption);
        }

        let event = self.backend.upload(file, caption).await?;
        info!(event_id = event.id, file = %file.name, "media moment submitted");
        self.after_mutation().await;
        Ok(event)
    }

    /// Delete every event on the backend (debug surface).
    pub async fn truncate(&self) -> SessionResult<()> {
        self.backend.truncate_events().await?;
        self.scheduler.stop();
        self.feed.send_replace(Vec::new());
        warn!("timeline truncated");
        Ok(())
    }

    async fn after_mutation(&self) {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "refresh after submit failed");
        }
        self.start_polling();
    }

    /// (Re)start the bounded auto-refresh window.
    pub fn start_polling(&self) {
        let backend = Arc::clone(&self.backend);
        let feed = Arc::clone(&self.feed);
        self.scheduler.start(
            move || {
                let backend = Arc::clone(&backend);
                let feed = Arc::clone(&feed);
                async move {
                    refresh_feed(backend.as_ref(), &feed)
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                }
            },
            self.poll_options,
        );
    }

    pub fn stop_polling(&self) {
        self.scheduler.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_active()
    }

    /// One-line rendering of an event, with the media address resolved.
    pub async fn render_line(&self, event: &TimelineEvent) -> String {
        let labels = event.labels();
        let labels = if labels.is_empty() {
            "No labels".to_string()
        } else {
            labels.join(", ")
        };
        let status = match event.processing_status {
            ProcessingStatus::Pending => " [processing]",
            ProcessingStatus::Failed => " [failed]",
            ProcessingStatus::Completed => "",
        };
        let kind = match event.kind {
            EventKind::Text => "text",
            EventKind::Image => "image",
        };

        let mut line = format!("#{} {kind} • {labels}{status}: {}", event.id, event.summary);
        if let Some(reference) = event.media_reference() {
            line.push_str(" <");
            line.push_str(&self.resolver.resolve_address(&reference).await);
            line.push('>');
        }
        if let Some(ai) = &event.ai_results {
            if let Some(event_type) = &ai.event_type {
                line.push_str(&format!(" (type: {event_type})"));
            }
            if !ai.faces.is_empty() {
                line.push_str(&format!(" (faces: {})", ai.faces.len()));
            }
        }
        line
    }
}

async fn refresh_feed(
    backend: &dyn BackendApi,
    feed: &watch::Sender<Vec<TimelineEvent>>,
) -> Result<usize, ApiError> {
    let events = backend.events().await?;
    let count = events.len();
    feed.send_if_modified(|current| {
        if *current == events {
            false
        } else {
            *current = events;
            true
        }
    });
    Ok(count)
}
