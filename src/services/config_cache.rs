//! Media address resolution.
//!
//! In direct mode the storage config is fetched from the backend once and
//! memoized. The in-flight fetch is itself part of the cached state, so
//! callers that arrive while it is pending join it instead of issuing their
//! own request. A failed fetch is memoized as well and resolves to a
//! placeholder address until the cache is invalidated.

use crate::{
    models::{media::MediaReference, remote_config::RemoteConfig},
    services::backend::{BackendApi, IMAGE_ENDPOINT},
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

/// Base used when no working storage config is available. Requests against
/// it fail visibly (broken image) instead of crashing the caller.
pub const PLACEHOLDER_BASE: &str = "https://your-bucket.s3.amazonaws.com";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressMode {
    /// Straight to the bucket using the fetched storage config.
    #[default]
    Direct,
    /// Through the backend's image endpoint; no config needed.
    Proxy,
}

impl FromStr for AddressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(AddressMode::Direct),
            "proxy" => Ok(AddressMode::Proxy),
            other => Err(format!("unknown address mode `{other}` (expected direct or proxy)")),
        }
    }
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressMode::Direct => "direct",
            AddressMode::Proxy => "proxy",
        })
    }
}

type ConfigFetch = Shared<BoxFuture<'static, Option<RemoteConfig>>>;

enum CacheState {
    Cold,
    Pending(ConfigFetch),
    /// `None` records a failed fetch.
    Resolved(Option<RemoteConfig>),
}

struct CacheInner {
    /// Bumped by `invalidate` so a fetch started before it cannot land after it.
    generation: u64,
    state: CacheState,
}

/// Memoized [`RemoteConfig`] for one backend.
pub struct ConfigCache {
    backend: Arc<dyn BackendApi>,
    inner: Mutex<CacheInner>,
}

impl ConfigCache {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            inner: Mutex::new(CacheInner {
                generation: 0,
                state: CacheState::Cold,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached config, fetching it on first use. `None` after a failed fetch.
    pub async fn remote_config(&self) -> Option<RemoteConfig> {
        let (generation, fetch) = {
            let mut inner = self.lock();
            let fetch = match &inner.state {
                CacheState::Resolved(config) => return config.clone(),
                CacheState::Pending(fetch) => fetch.clone(),
                CacheState::Cold => {
                    let backend = Arc::clone(&self.backend);
                    let fetch = fetch_remote_config(backend).boxed().shared();
                    inner.state = CacheState::Pending(fetch.clone());
                    fetch
                }
            };
            (inner.generation, fetch)
        };

        let resolved = fetch.await;

        let mut inner = self.lock();
        if inner.generation == generation && matches!(inner.state, CacheState::Pending(_)) {
            inner.state = CacheState::Resolved(resolved.clone());
        }
        resolved
    }

    /// Forget the cached config; the next caller fetches again.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = CacheState::Cold;
        info!(generation = inner.generation, "remote config cache invalidated");
    }
}

async fn fetch_remote_config(backend: Arc<dyn BackendApi>) -> Option<RemoteConfig> {
    debug!("fetching remote storage config");
    match backend.s3_config().await {
        Ok(config) => match config.validate() {
            Ok(()) => {
                info!(bucket = %config.bucket_name, region = %config.region, "remote storage config cached");
                Some(config)
            }
            Err(reason) => {
                warn!(%reason, "remote storage config unusable; using placeholder addresses");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "remote storage config fetch failed; using placeholder addresses");
            None
        }
    }
}

enum Strategy {
    Proxy { base: String },
    Direct(ConfigCache),
}

/// Turns media references into addresses, with one strategy for the whole
/// process.
pub struct AddressResolver {
    strategy: Strategy,
}

impl AddressResolver {
    pub fn proxy(backend_base: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Proxy {
                base: backend_base.into().trim_end_matches('/').to_string(),
            },
        }
    }

    pub fn direct(cache: ConfigCache) -> Self {
        Self {
            strategy: Strategy::Direct(cache),
        }
    }

    pub fn for_mode(mode: AddressMode, backend: Arc<dyn BackendApi>) -> Self {
        match mode {
            AddressMode::Proxy => Self::proxy(backend.base_url()),
            AddressMode::Direct => Self::direct(ConfigCache::new(backend)),
        }
    }

    pub fn mode(&self) -> AddressMode {
        match self.strategy {
            Strategy::Proxy { .. } => AddressMode::Proxy,
            Strategy::Direct(_) => AddressMode::Direct,
        }
    }

    /// Address for retrieving `reference`. Never fails; falls back to a
    /// placeholder when the storage config is unavailable.
    pub async fn resolve_address(&self, reference: &MediaReference) -> String {
        match &self.strategy {
            Strategy::Proxy { base } => format!("{base}{IMAGE_ENDPOINT}/{reference}"),
            Strategy::Direct(cache) => match cache.remote_config().await {
                Some(config) => config.object_address(reference),
                None => format!("{PLACEHOLDER_BASE}/{reference}"),
            },
        }
    }

    /// Drop any memoized config. No-op in proxy mode.
    pub fn invalidate(&self) {
        if let Strategy::Direct(cache) = &self.strategy {
            cache.invalidate();
        }
    }
}
