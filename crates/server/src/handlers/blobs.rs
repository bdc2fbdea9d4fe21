//! Blob endpoints: HEAD/GET/DELETE `/{image}/blobs/{digest}`.

use crate::access;
use crate::auth::{Action, AuthSession};
use crate::engine::blob;
use crate::error::{ErrorCode, OciError, OciResult};
use crate::oci::RouteInfo;
use crate::state::AppState;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use wharf_core::digest::Digest;
use wharf_storage::ContentStore;

fn require_digest(route: &RouteInfo) -> OciResult<&Digest> {
    route.digest.as_ref().ok_or_else(|| {
        OciError::new(
            ErrorCode::DigestInvalid,
            format!("malformed digest: {}", route.reference),
        )
    })
}

/// HEAD: size and content type from the tenant-scoped blob index.
pub async fn head(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::View, &parts.headers).await?;
    let digest = require_digest(route)?;
    let (size, media_type) = blob::stat_blob(state, &ctx, digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_LENGTH,
        size.to_string().parse().expect("length header"),
    );
    headers.insert(
        header::CONTENT_TYPE,
        media_type
            .parse()
            .unwrap_or_else(|_| "application/octet-stream".parse().expect("static")),
    );
    headers.insert(
        "docker-content-digest",
        digest.to_string().parse().expect("digest header"),
    );
    Ok((StatusCode::OK, headers).into_response())
}

/// Parse a `Range: bytes=a-b` header into an inclusive pair.
fn parse_range(headers: &HeaderMap) -> OciResult<Option<(u64, u64)>> {
    let Some(value) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| OciError::new(ErrorCode::RangeInvalid, "unsupported range unit"))?;
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| OciError::new(ErrorCode::RangeInvalid, "malformed range"))?;
    let start: u64 = start
        .parse()
        .map_err(|_| OciError::new(ErrorCode::RangeInvalid, "malformed range start"))?;
    let end: u64 = end
        .parse()
        .map_err(|_| OciError::new(ErrorCode::RangeInvalid, "malformed range end"))?;
    if end < start {
        return Err(OciError::new(ErrorCode::RangeInvalid, "inverted range"));
    }
    Ok(Some((start, end)))
}

/// GET: streaming read, with upstream pull-through on miss. Range requests
/// are honored for locally cached blobs.
pub async fn get(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::View, &parts.headers).await?;
    let digest = require_digest(route)?;

    // Range reads come straight from CAS and only for local content.
    if let Some((start, end)) = parse_range(&parts.headers)? {
        let (size, media_type) = blob::stat_blob(state, &ctx, digest).await?;
        if start >= size as u64 {
            return Err(OciError::new(ErrorCode::RangeInvalid, "range beyond blob size"));
        }
        let end_exclusive = (end + 1).min(size as u64);
        let bytes = state
            .cas
            .backend()
            .get_range(
                &ContentStore::blob_key(&ctx.root_space.identifier, digest),
                start,
                end_exclusive,
            )
            .await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{size}", end_exclusive - 1)
                .parse()
                .expect("content-range header"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            media_type
                .parse()
                .unwrap_or_else(|_| "application/octet-stream".parse().expect("static")),
        );
        headers.insert(
            "docker-content-digest",
            digest.to_string().parse().expect("digest header"),
        );
        return Ok((StatusCode::PARTIAL_CONTENT, headers, Body::from(bytes)).into_response());
    }

    let read = blob::open_blob(state, &ctx, &route.image, digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        read.media_type
            .parse()
            .unwrap_or_else(|_| "application/octet-stream".parse().expect("static")),
    );
    headers.insert(
        "docker-content-digest",
        digest.to_string().parse().expect("digest header"),
    );
    if let Some(size) = read.size {
        headers.insert(
            header::CONTENT_LENGTH,
            size.to_string().parse().expect("length header"),
        );
    }
    Ok((StatusCode::OK, headers, Body::from_stream(read.stream)).into_response())
}

/// DELETE: removes the registry-scoped reference only; the CAS object is
/// retained for other tenants' registries (GC is external).
pub async fn delete(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Delete, &parts.headers).await?;
    let digest = require_digest(route)?;
    blob::delete_blob(state, &ctx, digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}
