//! Routes of the resolving proxy.
//!
//! ## Structure
//! - `GET  /healthz` liveness
//! - `GET  /readyz` configured backends
//! - `GET|HEAD /{*path}?client=&bucket=` object stream
//! - `OPTIONS /{*path}` CORS preflight
//!
//! Every response, errors included, carries the CORS headers.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, missing_path, preflight},
    },
    services::server::ProxyState,
};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
    routing::get,
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

pub const ALLOWED_HEADERS: &str = "Access-Control-Allow-Headers, Origin, Authorization,Accept,x-client-id, X-Requested-With, Content-Type, Access-Control-Request-Method, Access-Control-Request-Headers, hypothesis-client-version";

const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
    (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
];

/// Routes carrying `ProxyState`, without middleware.
pub fn routes() -> Router<ProxyState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{*path}", get(get_object).options(preflight))
        .fallback(missing_path)
}

/// The complete proxy application.
pub fn app(state: ProxyState) -> Router {
    let mut router = routes().layer(TraceLayer::new_for_http());
    for (name, value) in CORS_HEADERS {
        router = router.layer(SetResponseHeaderLayer::overriding(
            name,
            HeaderValue::from_static(value),
        ));
    }
    router.with_state(state)
}
