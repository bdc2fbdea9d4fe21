//! `GET /v2/` version probe.

use crate::auth::{self, AuthSession};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::state::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

/// Version probe: 200 for callers allowed to pull, 401 with a bearer
/// challenge otherwise. Third-party clients use this to discover auth.
pub async fn probe(state: &AppState, session: &AuthSession) -> OciResult<Response> {
    if session.is_anonymous() && !state.config.auth.anonymous_pull {
        return Err(
            OciError::new(ErrorCode::Unauthorized, "authentication required")
                .with_challenge(auth::challenge(&state.config.server.realm)),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        "docker-distribution-api-version",
        "registry/2.0".parse().expect("static header"),
    );
    Ok((StatusCode::OK, headers, "{}").into_response())
}
