//! Routes of the local preview host.
//!
//! ## Structure
//! - `GET /healthz`   : liveness
//! - `GET /readyz`    : registry round-trip + backend reachability
//! - `GET /blob/{id}` : bytes behind a live object URL

use crate::{
    handlers::{
        blob_handlers::get_blob,
        health_handlers::{healthz, readyz},
    },
    services::{backend::BackendApi, object_urls::ObjectUrlRegistry},
};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HostState {
    pub registry: ObjectUrlRegistry,
    pub backend: Arc<dyn BackendApi>,
}

/// Build the router for the preview host.
pub fn routes() -> Router<HostState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/blob/{id}", get(get_blob))
}
