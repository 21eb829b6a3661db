//! Media preview pipeline.
//!
//! [`MediaPreviewPipeline::derive_preview`] turns one selected file into a
//! displayable object URL, transcoding HEIC-family input to JPEG.
//! [`PreviewSlot`] is the consumer side: it tracks the current selection,
//! discards results that arrive after a newer selection, and owns the URL
//! that is currently displayed.

use crate::{
    models::{
        media::{FormatFamily, SelectedFile},
        preview::PreviewState,
    },
    services::{
        object_urls::{ObjectUrl, ObjectUrlRegistry},
        transcode::{TranscodeError, Transcoder},
    },
};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewOptions {
    /// JPEG quality on the 1–100 scale.
    pub jpeg_quality: u8,
    /// Upper bound for one transcode.
    pub transcode_timeout: Duration,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            transcode_timeout: DEFAULT_TRANSCODE_TIMEOUT,
        }
    }
}

/// Terminal result of one conversion.
#[derive(Debug)]
pub enum PreviewOutcome {
    Ready(ObjectUrl),
    Failed { family: FormatFamily, reason: String },
}

pub struct MediaPreviewPipeline {
    registry: ObjectUrlRegistry,
    transcoder: Arc<dyn Transcoder>,
    options: PreviewOptions,
}

impl MediaPreviewPipeline {
    pub fn new(
        registry: ObjectUrlRegistry,
        transcoder: Arc<dyn Transcoder>,
        options: PreviewOptions,
    ) -> Self {
        Self {
            registry,
            transcoder,
            options,
        }
    }

    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    /// Produce a displayable URL for `file`.
    ///
    /// Always resolves to a terminal outcome; decode failures and timeouts
    /// come back as `Failed` tagged with the detected format family.
    #[tracing::instrument(skip(self, file), fields(file = %file.name, family))]
    pub async fn derive_preview(&self, file: SelectedFile) -> PreviewOutcome {
        let family = file.family();
        tracing::Span::current().record("family", family.as_str());

        match family {
            FormatFamily::Generic => {
                let content_type = file.content_type().to_string();
                PreviewOutcome::Ready(self.registry.create(file.bytes, content_type))
            }
            FormatFamily::Heic => match self.transcode(file).await {
                Ok(url) => PreviewOutcome::Ready(url),
                Err(err) => {
                    warn!(error = %err, "preview transcode failed");
                    PreviewOutcome::Failed {
                        family,
                        reason: err.to_string(),
                    }
                }
            },
        }
    }

    async fn transcode(&self, file: SelectedFile) -> Result<ObjectUrl, TranscodeError> {
        let limit = self.options.transcode_timeout;
        let started = std::time::Instant::now();
        let jpeg = tokio::time::timeout(
            limit,
            self.transcoder.to_jpeg(file.bytes, self.options.jpeg_quality),
        )
        .await
        .map_err(|_| TranscodeError::TimedOut(limit))??;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            size = jpeg.len(),
            "heic transcoded to jpeg"
        );
        Ok(self.registry.create(jpeg, "image/jpeg"))
    }
}

/// The single owner of whatever preview is currently displayed.
///
/// Each [`select`](Self::select) supersedes the previous one: only the most
/// recent selection may reach the displayed state, and every URL produced
/// along the way is released exactly once (on replacement, on discard, or
/// when the slot is closed).
pub struct PreviewSlot {
    pipeline: Arc<MediaPreviewPipeline>,
    inner: Arc<SlotInner>,
}

struct SlotInner {
    guard: Mutex<SlotShared>,
    state: watch::Sender<PreviewState>,
}

struct SlotShared {
    generation: u64,
    displayed: Option<ObjectUrl>,
    closed: bool,
}

impl SlotInner {
    fn lock(&self) -> MutexGuard<'_, SlotShared> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, generation: u64, outcome: PreviewOutcome) {
        let released = {
            let mut shared = self.lock();
            if shared.closed || shared.generation != generation {
                debug!(
                    generation,
                    current = shared.generation,
                    closed = shared.closed,
                    "discarding superseded preview"
                );
                // Dropped below, outside the lock.
                Some(outcome)
            } else {
                match outcome {
                    PreviewOutcome::Ready(url) => {
                        info!(url = %url, "preview ready");
                        self.state.send_replace(PreviewState::Ready {
                            url: url.to_string(),
                        });
                        shared.displayed.replace(url).map(PreviewOutcome::Ready)
                    }
                    PreviewOutcome::Failed { family, reason } => {
                        self.state
                            .send_replace(PreviewState::Failed { family, reason });
                        shared.displayed.take().map(PreviewOutcome::Ready)
                    }
                }
            }
        };
        drop(released);
    }
}

impl PreviewSlot {
    pub fn new(pipeline: Arc<MediaPreviewPipeline>) -> Self {
        let (state, _) = watch::channel(PreviewState::Idle);
        Self {
            pipeline,
            inner: Arc::new(SlotInner {
                guard: Mutex::new(SlotShared {
                    generation: 0,
                    displayed: None,
                    closed: false,
                }),
                state,
            }),
        }
    }

    /// Start converting `file`, superseding any selection still in flight.
    ///
    /// The returned handle completes once this selection's result has been
    /// either installed or discarded.
    pub fn select(&self, file: SelectedFile) -> JoinHandle<()> {
        let generation = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.generation
        };
        debug!(generation, file = %file.name, "preview selected");
        self.inner.state.send_replace(PreviewState::Pending);

        let pipeline = Arc::clone(&self.pipeline);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = pipeline.derive_preview(file).await;
            inner.settle(generation, outcome);
        })
    }

    /// Drop the current selection, releasing its URL.
    pub fn clear(&self) {
        let released = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.displayed.take()
        };
        self.inner.state.send_replace(PreviewState::Idle);
        drop(released);
    }

    pub fn state(&self) -> PreviewState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewState> {
        self.inner.state.subscribe()
    }

    /// Plain HTTP address of the displayed preview, if any.
    pub fn displayed_http_url(&self) -> Option<String> {
        self.inner.lock().displayed.as_ref().map(ObjectUrl::http_url)
    }

    /// Release everything. Results still in flight are released on arrival.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for PreviewSlot {
    fn drop(&mut self) {
        let released = {
            let mut shared = self.inner.lock();
            shared.closed = true;
            shared.displayed.take()
        };
        self.inner.state.send_replace(PreviewState::Idle);
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Returns fixed JPEG bytes, optionally waiting for a go signal first.
    #[derive(Default)]
    struct FakeTranscoder {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn to_jpeg(&self, _input: Bytes, quality: u8) -> Result<Bytes, TranscodeError> {
            assert_eq!(quality, DEFAULT_JPEG_QUALITY);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                Err(TranscodeError::Unsupported("hevc main 10".into()))
            } else {
                Ok(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]))
            }
        }
    }

    struct HangingTranscoder;

    #[async_trait]
    impl Transcoder for HangingTranscoder {
        async fn to_jpeg(&self, _input: Bytes, _quality: u8) -> Result<Bytes, TranscodeError> {
            std::future::pending().await
        }
    }

    fn pipeline(transcoder: Arc<dyn Transcoder>) -> Arc<MediaPreviewPipeline> {
        Arc::new(MediaPreviewPipeline::new(
            ObjectUrlRegistry::new("http://127.0.0.1:4000"),
            transcoder,
            PreviewOptions::default(),
        ))
    }

    fn heic() -> SelectedFile {
        SelectedFile::new("photo.heic", "", Bytes::from_static(b"heic"))
    }

    fn png() -> SelectedFile {
        SelectedFile::new("photo.png", "image/png", Bytes::from_static(b"png"))
    }

    #[tokio::test]
    async fn generic_file_skips_transcoder() {
        let transcoder = Arc::new(FakeTranscoder::default());
        let pipeline = pipeline(transcoder.clone());

        let PreviewOutcome::Ready(url) = pipeline.derive_preview(png()).await else {
            panic!("expected ready");
        };
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
        let blob = pipeline.registry().resolve(url.as_str()).unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(&blob.bytes[..], b"png");
    }

    #[tokio::test]
    async fn heic_file_is_transcoded_to_jpeg() {
        let transcoder = Arc::new(FakeTranscoder::default());
        let pipeline = pipeline(transcoder.clone());

        let PreviewOutcome::Ready(url) = pipeline.derive_preview(heic()).await else {
            panic!("expected ready");
        };
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
        assert!(url.as_str().starts_with("blob:"));
        let blob = pipeline.registry().resolve(url.as_str()).unwrap();
        assert_eq!(blob.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn heic_failure_is_tagged_and_allocates_nothing() {
        let pipeline = pipeline(Arc::new(FakeTranscoder {
            fail: true,
            ..Default::default()
        }));

        match pipeline.derive_preview(heic()).await {
            PreviewOutcome::Failed { family, reason } => {
                assert_eq!(family, FormatFamily::Heic);
                assert!(reason.contains("hevc main 10"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(pipeline.registry().created_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_transcode_times_out() {
        let pipeline = pipeline(Arc::new(HangingTranscoder));

        match pipeline.derive_preview(heic()).await {
            PreviewOutcome::Failed { family, reason } => {
                assert_eq!(family, FormatFamily::Heic);
                assert!(reason.contains("did not finish"), "{reason}");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn later_selection_wins_and_stale_result_is_released() {
        let gate = Arc::new(Notify::new());
        let pipeline = pipeline(Arc::new(FakeTranscoder {
            gate: Some(gate.clone()),
            ..Default::default()
        }));
        let registry = pipeline.registry().clone();
        let slot = PreviewSlot::new(pipeline);

        let first = slot.select(heic());
        tokio::task::yield_now().await;
        assert_eq!(slot.state(), PreviewState::Pending);

        slot.select(png()).await.unwrap();
        let PreviewState::Ready { url: shown } = slot.state() else {
            panic!("expected png preview");
        };
        assert_eq!(registry.resolve(&shown).unwrap().content_type, "image/png");

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(slot.state(), PreviewState::Ready { url: shown.clone() });
        assert_eq!(registry.created_total(), 2);
        assert_eq!(registry.revoked_total(), 1);
        assert_eq!(registry.live_count(), 1);

        slot.close();
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.revoked_total(), 2);
    }

    #[tokio::test]
    async fn replacement_releases_previous_preview() {
        let pipeline = pipeline(Arc::new(FakeTranscoder::default()));
        let registry = pipeline.registry().clone();
        let slot = PreviewSlot::new(pipeline);

        slot.select(png()).await.unwrap();
        slot.select(heic()).await.unwrap();

        assert_eq!(registry.created_total(), 2);
        assert_eq!(registry.revoked_total(), 1);
        let PreviewState::Ready { url } = slot.state() else {
            panic!("expected heic preview");
        };
        assert_eq!(registry.resolve(&url).unwrap().content_type, "image/jpeg");
        assert!(slot.displayed_http_url().unwrap().contains("/blob/"));
    }

    #[tokio::test]
    async fn failure_replaces_displayed_preview() {
        let pipeline = pipeline(Arc::new(FakeTranscoder {
            fail: true,
            ..Default::default()
        }));
        let registry = pipeline.registry().clone();
        let slot = PreviewSlot::new(pipeline);

        slot.select(png()).await.unwrap();
        slot.select(heic()).await.unwrap();

        assert!(matches!(
            slot.state(),
            PreviewState::Failed { family: FormatFamily::Heic, .. }
        ));
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.revoked_total(), 1);
    }

    #[tokio::test]
    async fn result_arriving_after_close_is_released() {
        let gate = Arc::new(Notify::new());
        let pipeline = pipeline(Arc::new(FakeTranscoder {
            gate: Some(gate.clone()),
            ..Default::default()
        }));
        let registry = pipeline.registry().clone();
        let slot = PreviewSlot::new(pipeline);
        let mut states = slot.subscribe();

        let pending = slot.select(heic());
        tokio::task::yield_now().await;
        slot.close();
        assert_eq!(*states.borrow_and_update(), PreviewState::Idle);

        gate.notify_one();
        pending.await.unwrap();

        assert_eq!(registry.created_total(), 1);
        assert_eq!(registry.revoked_total(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn clear_releases_and_goes_idle() {
        let pipeline = pipeline(Arc::new(FakeTranscoder::default()));
        let registry = pipeline.registry().clone();
        let slot = PreviewSlot::new(pipeline);

        slot.select(png()).await.unwrap();
        slot.clear();

        assert_eq!(slot.state(), PreviewState::Idle);
        assert_eq!(registry.live_count(), 0);
        assert!(slot.displayed_http_url().is_none());
    }
}
