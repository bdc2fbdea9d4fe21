//! Route configuration and the OCI dispatcher.
//!
//! OCI paths carry nested repository names (`/v2/root/reg/a/b/c/manifests/x`),
//! which no static route table can express, so everything under `/v2/` funnels
//! through one wildcard handler that runs the route parser and dispatches on
//! `(route type, method)`.

use crate::auth;
use crate::error::{ErrorCode, OciError};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::oci::{self, RouteType};
use crate::state::AppState;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use std::collections::HashMap;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/spaces", post(handlers::admin::create_space).get(handlers::admin::list_spaces))
        .route("/registries", post(handlers::admin::create_registry))
        .route(
            "/registries/{root}",
            get(handlers::admin::list_registries),
        )
        .route(
            "/registries/{root}/{registry}",
            get(handlers::admin::get_registry).delete(handlers::admin::delete_registry),
        )
        .route(
            "/registries/{root}/{registry}/stats",
            get(handlers::admin::image_stats),
        )
        .route(
            "/registries/{root}/{registry}/client-setup",
            get(handlers::setup::client_setup),
        );

    let oci_routes = Router::new()
        .route("/v2/", any(probe))
        .route("/v2", any(probe))
        .route("/v2/{*path}", any(oci_dispatch));

    let mut router = Router::new()
        .merge(oci_routes)
        .nest("/api/v1", api_routes)
        .route("/healthz", get(health));

    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Liveness probe for load balancers; intentionally unauthenticated.
async fn health(State(state): State<AppState>) -> Response {
    match state.metadata.health_check().await {
        Ok(()) => (StatusCode::OK, "{\"status\":\"ok\"}").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "{\"status\":\"degraded\"}").into_response()
        }
    }
}

async fn probe(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return OciError::new(ErrorCode::Unsupported, "unsupported method").into_response();
    }
    let session = match auth::session_from_headers(
        request.headers(),
        &state.config.auth,
        &state.config.server.realm,
    ) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    match handlers::base::probe(&state, &session).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Minimal query-string decoder; OCI parameters (digest, n, last, mount,
/// from, artifactType) never need full form semantics.
fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(query) = query else {
        return map;
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(percent_decode(key), percent_decode(value));
    }
    map
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte {
        Some(b) => (*b as char).to_digit(16).map(|d| d as u8),
        None => None,
    }
}

/// Dispatch an OCI request: parse the path, authenticate, and route to the
/// matching handler. All symbolic errors render as the v2 error envelope.
async fn oci_dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let params = parse_query(parts.uri.query());
    let route = oci::route::parse(parts.uri.path(), &params);

    // Invalid shapes never touch storage.
    if route.route_type() == RouteType::Invalid {
        return OciError::new(ErrorCode::NameUnknown, "unknown route").into_response();
    }

    let session = match auth::session_from_headers(
        &parts.headers,
        &state.config.auth,
        &state.config.server.realm,
    ) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let result = match (route.route_type(), parts.method.clone()) {
        (RouteType::Manifests, Method::GET | Method::HEAD) => {
            handlers::manifests::get(&state, &route, &session, &parts).await
        }
        (RouteType::Manifests, Method::PUT) => {
            match read_manifest_body(&state, body).await {
                Ok(payload) => {
                    handlers::manifests::put(&state, &route, &session, &parts, payload).await
                }
                Err(e) => Err(e),
            }
        }
        (RouteType::Manifests, Method::DELETE) => {
            handlers::manifests::delete(&state, &route, &session, &parts).await
        }
        (RouteType::Blobs, Method::HEAD) => {
            handlers::blobs::head(&state, &route, &session, &parts).await
        }
        (RouteType::Blobs, Method::GET) => {
            handlers::blobs::get(&state, &route, &session, &parts).await
        }
        (RouteType::Blobs, Method::DELETE) => {
            handlers::blobs::delete(&state, &route, &session, &parts).await
        }
        (RouteType::BlobUploadSession, Method::POST) => {
            handlers::uploads::create(&state, &route, &session, &parts, &params).await
        }
        (RouteType::BlobUploadSession, Method::PATCH) => {
            handlers::uploads::append(&state, &route, &session, &parts, body).await
        }
        (RouteType::BlobUploadSession, Method::PUT) => {
            handlers::uploads::commit(&state, &route, &session, &parts, body).await
        }
        (RouteType::BlobUploadSession, Method::GET) => {
            handlers::uploads::status(&state, &route, &session, &parts).await
        }
        (RouteType::BlobUploadSession, Method::DELETE) => {
            handlers::uploads::cancel(&state, &route, &session, &parts).await
        }
        (RouteType::Tags, Method::GET) => {
            handlers::tags::list(&state, &route, &session, &parts, &params).await
        }
        (RouteType::Referrers, Method::GET) => {
            handlers::referrers::list(&state, &route, &session, &parts, &params).await
        }
        _ => Err(OciError::new(
            ErrorCode::Unsupported,
            format!("method {} not supported here", parts.method),
        )
        .with_status(StatusCode::METHOD_NOT_ALLOWED)),
    };

    match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Buffer a manifest body, bounded by the configured payload cap.
async fn read_manifest_body(
    state: &AppState,
    body: Body,
) -> Result<bytes::Bytes, OciError> {
    let cap = state.config.oci.max_manifest_payload_bytes as usize;
    axum::body::to_bytes(body, cap).await.map_err(|_| {
        OciError::new(
            ErrorCode::PayloadTooLarge,
            format!("manifest payload exceeds limit {cap}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_handles_oci_parameters() {
        let params = parse_query(Some("digest=sha256%3Aabc&n=50&last=v1.2"));
        assert_eq!(params.get("digest").unwrap(), "sha256:abc");
        assert_eq!(params.get("n").unwrap(), "50");
        assert_eq!(params.get("last").unwrap(), "v1.2");
    }

    #[test]
    fn query_parsing_tolerates_bare_keys() {
        let params = parse_query(Some("flag&x=1"));
        assert_eq!(params.get("flag").unwrap(), "");
        assert_eq!(params.get("x").unwrap(), "1");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn percent_decoding_is_safe_on_truncated_input() {
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("a%"), "a%");
        assert_eq!(percent_decode("a+b"), "a b");
    }
}
