//! Serves live object URLs so previews can be opened in a viewer.

use crate::{errors::AppError, routes::routes::HostState, services::object_urls::Blob};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use uuid::Uuid;

/// `GET /blob/{id}`: bytes of a registered blob; 404 once revoked.
pub async fn get_blob(
    State(state): State<HostState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let blob = Uuid::parse_str(&id)
        .ok()
        .and_then(|id| state.registry.get(&id))
        .ok_or_else(|| AppError::not_found(format!("object url `{id}` is not live")))?;

    let mut response = Response::new(Body::empty());
    set_blob_headers(response.headers_mut(), &blob);
    *response.body_mut() = Body::from(blob.bytes);
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, blob: &Blob) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(blob.bytes.len()));

    let quoted = format!("\"{}\"", blob.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    // The URL dies with its owner; never let a viewer reuse a stale copy.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}
