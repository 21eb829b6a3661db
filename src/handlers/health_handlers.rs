//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the object URL registry and the backend

use crate::routes::routes::HostState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness only; never touches the registry or the backend.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Registers, resolves and revokes a throwaway object URL.
/// 2. Calls the backend's `/health`.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<HostState>) -> impl IntoResponse {
    // 1) Registry round-trip
    let registry_check = {
        let probe = state
            .registry
            .create(Bytes::from_static(b"readyz"), "text/plain");
        let check = match state.registry.resolve(probe.as_str()) {
            Some(blob) if &blob.bytes[..] == b"readyz" => CheckStatus::ok(),
            Some(_) => CheckStatus::failed("blob content mismatch"),
            None => CheckStatus::failed("registered blob did not resolve"),
        };
        probe.revoke();
        check
    };

    // 2) Backend reachability
    let backend_check = match state.backend.health().await {
        Ok(()) => CheckStatus::ok(),
        Err(err) => CheckStatus::failed(err.to_string()),
    };

    let overall_ok = registry_check.ok && backend_check.ok;

    let mut checks = HashMap::new();
    checks.insert("registry", registry_check);
    checks.insert("backend", backend_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        live_object_urls: state.registry.live_count(),
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    live_object_urls: usize,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
