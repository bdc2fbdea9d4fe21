//! Manifest endpoints: HEAD/GET/PUT/DELETE `/{image}/manifests/{reference}`.

use crate::access;
use crate::auth::{Action, AuthSession};
use crate::engine::manifest::{self, ClientPlatform, VerifyMode};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::oci::RouteInfo;
use crate::state::AppState;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// HEAD and GET share resolution; HEAD drops the body.
pub async fn get(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::View, &parts.headers).await?;

    let accept = parts
        .headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());
    let platform = ClientPlatform::from_user_agent(
        parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok()),
    );

    let resolved = manifest::get_manifest(
        state,
        &ctx,
        &route.image,
        route.digest.as_ref(),
        route.tag.as_deref(),
        accept,
        &platform,
    )
    .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        resolved
            .media_type
            .parse()
            .map_err(|_| OciError::internal("invalid stored media type"))?,
    );
    headers.insert(
        "docker-content-digest",
        resolved
            .digest
            .to_string()
            .parse()
            .expect("digest header value"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        resolved.payload.len().to_string().parse().expect("length"),
    );

    let body = if parts.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(resolved.payload)
    };
    Ok((StatusCode::OK, headers, body).into_response())
}

/// PUT `/{image}/manifests/{reference}`.
pub async fn put(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    payload: Bytes,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    if ctx.is_upstream() {
        return Err(OciError::new(
            ErrorCode::Denied,
            "upstream registries are read-only",
        ));
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let outcome = manifest::put_manifest(
        state,
        &ctx,
        &route.image,
        &route.reference,
        content_type,
        payload,
        VerifyMode::Strict,
    )
    .await?;

    let location = ctx.urls.url(&format!(
        "/v2/{}/{}/{}/manifests/{}",
        route.root, route.registry, route.image, outcome.digest
    ));

    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location.parse().expect("location header"));
    headers.insert(
        "docker-content-digest",
        outcome
            .digest
            .to_string()
            .parse()
            .expect("digest header value"),
    );
    if let Some(subject) = &outcome.subject_digest {
        headers.insert(
            "oci-subject",
            subject.to_string().parse().expect("subject header"),
        );
    }
    Ok((StatusCode::CREATED, headers).into_response())
}

/// DELETE `/{image}/manifests/{reference}`: by digest removes the
/// manifest; by tag removes only the tag.
pub async fn delete(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Delete, &parts.headers).await?;
    if ctx.is_upstream() {
        return Err(OciError::new(
            ErrorCode::Denied,
            "upstream registries are read-only",
        ));
    }

    manifest::delete_manifest(
        state,
        &ctx,
        &route.image,
        route.digest.as_ref(),
        route.tag.as_deref(),
    )
    .await?;
    Ok(StatusCode::ACCEPTED.into_response())
}
