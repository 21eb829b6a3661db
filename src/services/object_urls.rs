//! In-process object URLs.
//!
//! The registry plays the role of `URL.createObjectURL` / `revokeObjectURL`:
//! bytes are registered under a fresh `blob:{origin}/{uuid}` address and stay
//! reachable (through the preview host) until their [`ObjectUrl`] guard is
//! dropped. Ownership of the guard is ownership of the resource, so a URL
//! cannot be released twice and cannot outlive its owner.

use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, warn};
use uuid::Uuid;

/// A registered blob as served to viewers.
#[derive(Clone, Debug)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
    /// Hex MD5 of `bytes`.
    pub etag: String,
}

#[derive(Clone)]
pub struct ObjectUrlRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    origin: String,
    blobs: Mutex<HashMap<Uuid, Blob>>,
    created: AtomicU64,
    revoked: AtomicU64,
}

impl ObjectUrlRegistry {
    /// `origin` is the base URL of the preview host, e.g. `http://127.0.0.1:4000`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                origin: origin.into().trim_end_matches('/').to_string(),
                blobs: Mutex::new(HashMap::new()),
                created: AtomicU64::new(0),
                revoked: AtomicU64::new(0),
            }),
        }
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<Uuid, Blob>> {
        self.inner
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `bytes` and hand back the owning guard.
    pub fn create(&self, bytes: Bytes, content_type: impl Into<String>) -> ObjectUrl {
        let id = Uuid::new_v4();
        let blob = Blob {
            etag: format!("{:x}", md5::compute(&bytes)),
            bytes,
            content_type: content_type.into(),
        };
        debug!(%id, size = blob.bytes.len(), content_type = %blob.content_type, "object url created");
        self.blobs().insert(id, blob);
        self.inner.created.fetch_add(1, Ordering::Relaxed);

        ObjectUrl {
            id,
            url: format!("blob:{}/{}", self.inner.origin, id),
            registry: self.clone(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Blob> {
        self.blobs().get(id).cloned()
    }

    /// Look up a `blob:` URL previously returned by [`create`](Self::create).
    pub fn resolve(&self, url: &str) -> Option<Blob> {
        let rest = url.strip_prefix("blob:")?;
        let (origin, id) = rest.rsplit_once('/')?;
        if origin != self.inner.origin {
            return None;
        }
        let id = Uuid::parse_str(id).ok()?;
        self.get(&id)
    }

    /// Number of URLs currently alive.
    pub fn live_count(&self) -> usize {
        self.blobs().len()
    }

    pub fn created_total(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }

    pub fn revoked_total(&self) -> u64 {
        self.inner.revoked.load(Ordering::Relaxed)
    }

    fn revoke(&self, id: &Uuid) {
        if self.blobs().remove(id).is_some() {
            self.inner.revoked.fetch_add(1, Ordering::Relaxed);
            debug!(%id, "object url revoked");
        } else {
            warn!(%id, "object url revoked twice");
        }
    }
}

/// Owning handle to a registered blob. Dropping it revokes the URL.
pub struct ObjectUrl {
    id: Uuid,
    url: String,
    registry: ObjectUrlRegistry,
}

impl ObjectUrl {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The `blob:` address handed to viewers.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Plain HTTP address of the same blob on the preview host.
    pub fn http_url(&self) -> String {
        format!("{}/blob/{}", self.registry.origin(), self.id)
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn revoke(self) {
        drop(self);
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.registry.revoke(&self.id);
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectUrl").field(&self.url).finish()
    }
}
