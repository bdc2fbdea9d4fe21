//! Blob upload endpoints: POST/PATCH/PUT/GET/DELETE
//! `/{image}/blobs/uploads/[{session}]`.
//!
//! Sessions are persisted so any node can accept follow-up PATCHes; the
//! in-process session lock serializes local writers and the offset
//! compare-and-swap in the store catches cross-process races.

use crate::access::{self, RegistryContext};
use crate::auth::{Action, AuthSession};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::locks::LockRegistry;
use crate::metrics;
use crate::oci::RouteInfo;
use crate::state::AppState;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;
use wharf_core::upload::UploadState;
use wharf_metadata::models::UploadSessionRow;

fn deny_upstream(ctx: &RegistryContext) -> OciResult<()> {
    if ctx.is_upstream() {
        return Err(OciError::new(
            ErrorCode::Denied,
            "upstream registries are read-only",
        ));
    }
    Ok(())
}

fn parse_session_id(route: &RouteInfo) -> OciResult<Uuid> {
    if route.reference.is_empty() {
        return Err(OciError::new(
            ErrorCode::BlobUploadInvalid,
            "missing upload session id",
        ));
    }
    Uuid::parse_str(&route.reference).map_err(|_| {
        OciError::new(
            ErrorCode::BlobUploadInvalid,
            format!("malformed upload session id: {}", route.reference),
        )
    })
}

async fn load_active_session(
    state: &AppState,
    ctx: &RegistryContext,
    id: Uuid,
) -> OciResult<UploadSessionRow> {
    let session = state.metadata.get_upload(id).await?.ok_or_else(|| {
        OciError::new(ErrorCode::BlobUploadUnknown, format!("upload {id} unknown"))
    })?;
    if session.registry_id != ctx.registry.id {
        return Err(OciError::new(
            ErrorCode::BlobUploadUnknown,
            "upload session belongs to a different registry",
        ));
    }
    let upload_state: UploadState = session
        .state
        .parse()
        .map_err(|_| OciError::internal("corrupt upload state"))?;
    if !upload_state.is_active() {
        return Err(OciError::new(
            ErrorCode::BlobUploadInvalid,
            format!("upload session is {upload_state}"),
        ));
    }
    Ok(session)
}

fn upload_headers(ctx: &RegistryContext, route: &RouteInfo, id: &Uuid, offset: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        ctx.urls
            .upload_url(&route.root, &route.registry, &route.image, id)
            .parse()
            .expect("location header"),
    );
    headers.insert(
        "docker-upload-uuid",
        id.to_string().parse().expect("uuid header"),
    );
    let end = if offset > 0 { offset - 1 } else { 0 };
    headers.insert(
        header::RANGE,
        format!("0-{end}").parse().expect("range header"),
    );
    headers
}

/// POST `/{image}/blobs/uploads/`: open a session, or cross-mount an
/// existing blob when `?mount=<digest>&from=<repo>` is present.
pub async fn create(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    params: &HashMap<String, String>,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    deny_upstream(&ctx)?;

    let image = state
        .metadata
        .ensure_image(ctx.registry.id, &route.image)
        .await?;

    // Cross-mount: copy-free blob reuse within the tenant. A miss falls
    // through to a regular session per the distribution spec.
    if let Some(mount) = params.get("mount") {
        let digest = wharf_core::digest::Digest::parse(mount)
            .map_err(|_| OciError::new(ErrorCode::DigestInvalid, "malformed mount digest"))?;
        if let Some(blob) = state
            .metadata
            .find_blob(ctx.root_space.id, &digest.to_string())
            .await?
        {
            state
                .metadata
                .link_blob(ctx.registry.id, image.id, blob.id)
                .await?;
            metrics::CROSS_MOUNTS.inc();
            tracing::info!(
                digest = %digest,
                from = params.get("from").map(String::as_str).unwrap_or(""),
                image = %route.image,
                "blob cross-mounted"
            );

            let mut headers = HeaderMap::new();
            headers.insert(
                header::LOCATION,
                ctx.urls
                    .blob_url(&route.root, &route.registry, &route.image, &digest.to_string())
                    .parse()
                    .expect("location header"),
            );
            headers.insert(
                "docker-content-digest",
                digest.to_string().parse().expect("digest header"),
            );
            return Ok((StatusCode::CREATED, headers).into_response());
        }
    }

    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .create_upload(&UploadSessionRow {
            id,
            registry_id: ctx.registry.id,
            image_id: image.id,
            state: UploadState::Open.as_str().to_string(),
            offset: 0,
            created_at: now,
            updated_at: now,
        })
        .await?;

    metrics::UPLOAD_SESSIONS_CREATED.inc();
    tracing::info!(upload_id = %id, image = %route.image, "upload session opened");

    let headers = upload_headers(&ctx, route, &id, 0);
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

/// Validate a `Content-Range` header against the persisted offset. The
/// start must equal the current offset exactly; docker also streams
/// PATCHes with no header at all, which means "append here".
fn check_content_range(headers: &HeaderMap, offset: i64) -> OciResult<()> {
    let Some(value) = headers.get(header::CONTENT_RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    let spec = value.strip_prefix("bytes ").unwrap_or(value);
    let range = spec.split('/').next().unwrap_or(spec);
    let (start, _end) = range
        .split_once('-')
        .ok_or_else(|| OciError::new(ErrorCode::RangeInvalid, "malformed content-range"))?;
    let start: i64 = start
        .parse()
        .map_err(|_| OciError::new(ErrorCode::RangeInvalid, "malformed content-range start"))?;
    if start != offset {
        return Err(OciError::new(
            ErrorCode::RangeInvalid,
            format!("content-range starts at {start}, session offset is {offset}"),
        ));
    }
    Ok(())
}

/// Append the request body to the session's staging object and advance the
/// offset under CAS. Returns the new offset.
async fn append_body(
    state: &AppState,
    ctx: &RegistryContext,
    session: &UploadSessionRow,
    body: Body,
) -> OciResult<i64> {
    let mut appended: i64 = 0;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| OciError::new(ErrorCode::BlobUploadInvalid, format!("body read: {e}")))?;
        if chunk.is_empty() {
            continue;
        }
        appended += chunk.len() as i64;
        state
            .cas
            .append_staged(&ctx.root_space.identifier, &session.id, chunk)
            .await?;
    }

    let new_offset = session.offset + appended;
    let advanced = state
        .metadata
        .advance_upload(
            session.id,
            session.offset,
            new_offset,
            OffsetDateTime::now_utc(),
        )
        .await?;
    if !advanced {
        // A concurrent writer (other process) won the offset race. The
        // staging object may hold garbage now; the sweeper reclaims it.
        return Err(OciError::new(
            ErrorCode::BlobUploadInvalid,
            "upload offset conflict",
        ));
    }
    Ok(new_offset)
}

/// PATCH `/{image}/blobs/uploads/{session}`: append a chunk.
pub async fn append(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    body: Body,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    deny_upstream(&ctx)?;
    let id = parse_session_id(route)?;

    // Serialize local appends to this session.
    let _guard = state.locks.acquire(&LockRegistry::upload_key(&id)).await;

    let upload = load_active_session(state, &ctx, id).await?;
    check_content_range(&parts.headers, upload.offset)?;
    let new_offset = append_body(state, &ctx, &upload, body).await?;

    let headers = upload_headers(&ctx, route, &id, new_offset);
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

/// PUT `/{image}/blobs/uploads/{session}?digest=<d>`: optional final chunk,
/// then verify and commit into the CAS.
pub async fn commit(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    body: Body,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    deny_upstream(&ctx)?;
    let id = parse_session_id(route)?;

    let expected = route.digest.clone().ok_or_else(|| {
        OciError::new(ErrorCode::DigestInvalid, "missing digest query parameter")
    })?;

    let _guard = state.locks.acquire(&LockRegistry::upload_key(&id)).await;

    let upload = load_active_session(state, &ctx, id).await?;
    let _offset = append_body(state, &ctx, &upload, body).await?;

    // The staged bytes run through the hashing reader once more; only a
    // matching digest moves the object into the CAS.
    let size = match state
        .cas
        .commit_staged(&ctx.root_space.identifier, &id, &expected)
        .await
    {
        Ok(size) => size,
        Err(wharf_storage::StorageError::DigestMismatch { expected, actual }) => {
            metrics::DIGEST_MISMATCHES.inc();
            tracing::warn!(expected = %expected, actual = %actual, upload_id = %id, "upload digest mismatch");
            return Err(
                OciError::new(ErrorCode::DigestInvalid, "uploaded bytes do not match digest")
                    .with_detail(format!("expected {expected}, got {actual}")),
            );
        }
        Err(e) => return Err(e.into()),
    };

    let committed = state
        .metadata
        .update_upload_state(
            id,
            &[UploadState::Open.as_str(), UploadState::Receiving.as_str()],
            UploadState::Committed.as_str(),
            OffsetDateTime::now_utc(),
        )
        .await?;
    if !committed {
        return Err(OciError::new(
            ErrorCode::BlobUploadInvalid,
            "upload session already closed",
        ));
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| *ct != "application/octet-stream");
    let blob = state
        .metadata
        .ensure_blob(
            ctx.root_space.id,
            &expected.to_string(),
            size as i64,
            content_type,
        )
        .await?;
    state
        .metadata
        .link_blob(ctx.registry.id, upload.image_id, blob.id)
        .await?;

    metrics::UPLOAD_SESSIONS_COMMITTED.inc();
    tracing::info!(upload_id = %id, digest = %expected, size, "upload committed");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        ctx.urls
            .blob_url(&route.root, &route.registry, &route.image, &expected.to_string())
            .parse()
            .expect("location header"),
    );
    headers.insert(
        "docker-content-digest",
        expected.to_string().parse().expect("digest header"),
    );
    Ok((StatusCode::CREATED, headers).into_response())
}

/// GET `/{image}/blobs/uploads/{session}`: report progress.
pub async fn status(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    let id = parse_session_id(route)?;
    let upload = load_active_session(state, &ctx, id).await?;

    let headers = upload_headers(&ctx, route, &id, upload.offset);
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

/// DELETE `/{image}/blobs/uploads/{session}`: cancel and discard staging.
pub async fn cancel(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::Upload, &parts.headers).await?;
    let id = parse_session_id(route)?;

    let _guard = state.locks.acquire(&LockRegistry::upload_key(&id)).await;
    let _upload = load_active_session(state, &ctx, id).await?;

    state
        .metadata
        .update_upload_state(
            id,
            &[UploadState::Open.as_str(), UploadState::Receiving.as_str()],
            UploadState::Cancelled.as_str(),
            OffsetDateTime::now_utc(),
        )
        .await?;
    state
        .cas
        .delete_staged(&ctx.root_space.identifier, &id)
        .await?;

    tracing::info!(upload_id = %id, "upload cancelled");
    Ok(StatusCode::NO_CONTENT.into_response())
}
