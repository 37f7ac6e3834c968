//! The resolving proxy handler.
//!
//! Parses the object path plus `client`/`bucket` from the request URL,
//! resolves the backend through the registry and streams the object back
//! without buffering it.

use crate::{
    errors::AppError,
    models::{mime::FALLBACK_CONTENT_TYPE, reference::ObjectReference},
    services::server::ProxyState,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::Response,
};
use tracing::{debug, error, warn};

/// `GET|HEAD /{*path}?client=<id>&bucket=<bucket>`
pub async fn get_object(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    let reference = ObjectReference::from_parts(uri.path(), uri.query()).map_err(|err| {
        warn!(uri = %uri, error = %err, "malformed object url");
        AppError::from(err)
    })?;

    let client = state.registry.resolve(reference.client.as_deref());
    if let Some(requested) = reference.client.as_deref().filter(|id| *id != client.id()) {
        debug!(requested, using = client.id(), "unknown client, serving from default");
    }
    if let Some(bucket) = reference.bucket.as_deref().filter(|b| *b != client.bucket()) {
        warn!(
            requested = bucket,
            configured = client.bucket(),
            backend = client.id(),
            "bucket mismatch, using the configured bucket"
        );
    }

    let stream = client.get(&reference.path).await.map_err(|err| {
        error!(backend = client.id(), key = %reference.path, error = %err, "object read failed");
        AppError::backend(&err, &reference.path)
    })?;

    let content_type = state.mime.content_type_for(&reference.path);
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(stream)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );
    Ok(response)
}

/// `OPTIONS /{*path}`: CORS preflight. The headers come from the router.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Any request without an object path.
pub async fn missing_path(uri: Uri) -> AppError {
    warn!(uri = %uri, "request without object path");
    AppError::bad_request("Missing object path")
}
