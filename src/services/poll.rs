//! Bounded auto-refresh.
//!
//! After a mutation the backend keeps annotating in the background and there
//! is no push channel, so the timeline is re-read on an interval until a hard
//! expiry. The scheduler is an explicit `Idle`/`Active` state machine; an
//! active session owns exactly one task, and that task owns both the interval
//! and the expiry timer.

use futures::future::BoxFuture;
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);
pub const DEFAULT_POLL_MAX_DURATION: Duration = Duration::from_millis(120_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_duration: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: DEFAULT_POLL_MAX_DURATION,
        }
    }
}

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct PollSession {
    id: u64,
    started_at: Instant,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollSession {
    fn retire(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

enum PollState {
    Idle,
    Active(PollSession),
}

struct SchedulerInner {
    next_id: u64,
    state: PollState,
}

pub struct PollScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                next_id: 0,
                state: PollState::Idle,
            })),
        }
    }

    /// Begin calling `refresh` every `options.interval` until
    /// `options.max_duration` has passed. Any running session is fully
    /// retired first.
    ///
    /// `refresh` errors are logged and never end the session.
    pub fn start<F, Fut>(&self, refresh: F, options: PollOptions)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let refresh: RefreshFn =
            Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(refresh()) });

        let mut inner = lock(&self.inner);
        if let PollState::Active(previous) = std::mem::replace(&mut inner.state, PollState::Idle) {
            debug!(session = previous.id, "retiring poll session before restart");
            previous.retire();
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let started_at = Instant::now();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            id,
            Arc::clone(&self.inner),
            refresh,
            options,
            started_at,
            cancel.clone(),
        ));

        info!(
            session = id,
            interval_ms = options.interval.as_millis() as u64,
            max_duration_ms = options.max_duration.as_millis() as u64,
            "poll session started"
        );
        inner.state = PollState::Active(PollSession {
            id,
            started_at,
            cancel,
            task,
        });
    }

    /// Cancel the running session, if any. Safe to call when idle.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut lock(&self.inner).state, PollState::Idle);
        if let PollState::Active(session) = previous {
            info!(
                session = session.id,
                elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                "poll session stopped"
            );
            session.retire();
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(lock(&self.inner).state, PollState::Active(_))
    }

    /// Identifier of the running session.
    pub fn session_id(&self) -> Option<u64> {
        match &lock(&self.inner).state {
            PollState::Active(session) => Some(session.id),
            PollState::Idle => None,
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(inner: &Mutex<SchedulerInner>) -> MutexGuard<'_, SchedulerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_session(
    id: u64,
    inner: Arc<Mutex<SchedulerInner>>,
    refresh: RefreshFn,
    options: PollOptions,
    started_at: Instant,
    cancel: CancellationToken,
) {
    let expiry = time::sleep_until(started_at + options.max_duration);
    tokio::pin!(expiry);
    let mut ticker = time::interval_at(started_at + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut ticks: u64 = 0;
    loop {
        // Expiry is checked before the ticker so a tick due at the same
        // instant as the expiry never runs.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut expiry => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            return;
        }

        ticks += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            outcome = refresh() => outcome,
        };
        if let Err(err) = outcome {
            warn!(session = id, tick = ticks, error = %err, "poll refresh failed; continuing");
        }
    }

    info!(session = id, ticks, "poll session expired");
    let mut inner = lock(&inner);
    if matches!(&inner.state, PollState::Active(session) if session.id == id) {
        inner.state = PollState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let refresh = move || -> BoxFuture<'static, anyhow::Result<()>> {
            handle.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        };
        (count, refresh)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_until_expiry() {
        let scheduler = PollScheduler::new();
        let (count, refresh) = counter();
        scheduler.start(refresh, PollOptions::default());
        assert!(scheduler.is_active());

        time::sleep(Duration::from_millis(3_001)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        time::sleep(Duration::from_millis(200_000)).await;
        // 3 s, 6 s, ... 117 s; the tick due at 120 s loses to the expiry.
        assert_eq!(count.load(Ordering::SeqCst), 39);
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.session_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_invocations() {
        let scheduler = PollScheduler::new();
        let (count, refresh) = counter();
        scheduler.start(refresh, PollOptions::default());

        time::sleep(Duration::from_millis(7_000)).await;
        scheduler.stop();
        assert!(!scheduler.is_active());
        let at_stop = count.load(Ordering::SeqCst);
        assert_eq!(at_stop, 2);

        time::sleep(Duration::from_millis(200_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);

        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_retires_previous_session() {
        let scheduler = PollScheduler::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        scheduler.start(first, PollOptions::default());
        let first_id = scheduler.session_id().unwrap();
        time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(first_count.load(Ordering::SeqCst), 1);

        scheduler.start(second, PollOptions::default());
        assert_ne!(scheduler.session_id().unwrap(), first_id);

        time::sleep(Duration::from_millis(31_000)).await;
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 10);

        // The second session's expiry counts from its own start.
        time::sleep(Duration::from_millis(100_000)).await;
        assert_eq!(second_count.load(Ordering::SeqCst), 39);
        assert!(!scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_errors_do_not_stop_polling() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        scheduler.start(
            move || {
                handle.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("backend unreachable")) }
            },
            PollOptions {
                interval: Duration::from_millis(1_000),
                max_duration: Duration::from_millis(10_500),
            },
        );

        time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(!scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_does_not_burst() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        scheduler.start(
            move || {
                handle.fetch_add(1, Ordering::SeqCst);
                async {
                    time::sleep(Duration::from_millis(2_500)).await;
                    Ok::<(), anyhow::Error>(())
                }
            },
            PollOptions {
                interval: Duration::from_millis(1_000),
                max_duration: Duration::from_millis(10_000),
            },
        );

        // Ticks at 1 s, 3.5 s, 6 s, 8.5 s; each waits for the previous refresh.
        time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_stops_session() {
        let (count, refresh) = counter();
        {
            let scheduler = PollScheduler::new();
            scheduler.start(refresh, PollOptions::default());
            time::sleep(Duration::from_millis(3_500)).await;
        }
        time::sleep(Duration::from_millis(60_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
