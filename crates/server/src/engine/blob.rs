//! Blob engine: streaming reads with upstream pull-through.

use crate::access::RegistryContext;
use crate::error::{ErrorCode, OciError, OciResult};
use crate::metrics;
use crate::state::AppState;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use wharf_core::digest::Digest;
use wharf_storage::{ByteStream, StorageResult};

/// Channel depth between the upstream reader and the client writer. Acts as
/// back-pressure: the remote fetch stalls once the client stops draining.
const TEE_CHANNEL_DEPTH: usize = 16;

/// A blob ready to stream to the client.
pub struct BlobRead {
    pub stream: ByteStream,
    pub size: Option<u64>,
    pub media_type: String,
}

/// Metadata-only blob lookup (HEAD), scoped to the tenant root.
pub async fn stat_blob(
    state: &AppState,
    ctx: &RegistryContext,
    digest: &Digest,
) -> OciResult<(i64, String)> {
    let blob = state
        .metadata
        .find_blob(ctx.root_space.id, &digest.to_string())
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::BlobUnknown, format!("blob {digest} unknown"))
        })?;
    let media_type = blob
        .media_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok((blob.size, media_type))
}

/// Open a blob for streaming. On miss in an upstream registry the remote
/// body is teed into CAS staging and to the client simultaneously; a client
/// disconnect stops the client leg but the cache keeps warming within the
/// configured grace window.
pub async fn open_blob(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: &Digest,
) -> OciResult<BlobRead> {
    // Local hit: serve straight from CAS.
    if let Some(blob) = state
        .metadata
        .find_blob(ctx.root_space.id, &digest.to_string())
        .await?
    {
        let stream = state.cas.open(&ctx.root_space.identifier, digest).await?;
        record_blob_download(state, ctx, image_name, digest).await;
        metrics::BLOBS_PULLED.inc();
        return Ok(BlobRead {
            stream,
            size: Some(blob.size as u64),
            media_type: blob
                .media_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        });
    }

    if !ctx.is_upstream() {
        return Err(OciError::new(
            ErrorCode::BlobUnknown,
            format!("blob {digest} unknown"),
        ));
    }

    pull_through(state, ctx, image_name, digest).await
}

async fn record_blob_download(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: &Digest,
) {
    if let Ok(Some(image)) = state.metadata.find_image(ctx.registry.id, image_name).await {
        let metadata = state.metadata.clone();
        let registry_id = ctx.registry.id;
        let digest = digest.to_string();
        let image_id = image.id;
        tokio::spawn(async move {
            let _ = metadata
                .record_download(
                    registry_id,
                    image_id,
                    None,
                    Some(&digest),
                    time::OffsetDateTime::now_utc(),
                )
                .await;
        });
    }
}

/// Fetch from the remote, teeing bytes into a hashing staging writer and to
/// the client. The fetch task owns the remote reader and staging writer;
/// the HTTP response is a downstream consumer whose cancellation does not
/// propagate up past the grace window.
async fn pull_through(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: &Digest,
) -> OciResult<BlobRead> {
    let upstream_config_id = ctx
        .registry
        .upstream_config_id
        .ok_or_else(|| OciError::internal("upstream registry without upstream config"))?;
    let upstream_config = state
        .metadata
        .get_upstream_config(upstream_config_id)
        .await?
        .ok_or_else(|| OciError::internal("upstream config missing"))?;

    let response = state
        .upstream
        .fetch_blob(&upstream_config, image_name, digest)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::BlobUnknown, format!("blob {digest} unknown upstream"))
        })?;

    let size = response.content_length();
    let media_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let writer = state.cas.stage(&ctx.root_space.identifier).await?;
    let (sender, receiver) = mpsc::channel::<StorageResult<Bytes>>(TEE_CHANNEL_DEPTH);

    let grace = state.upstream.tuning().disconnect_grace();
    let expected = digest.clone();
    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_image = image_name.to_string();
    let task_media_type = media_type.clone();

    tokio::spawn(async move {
        let mut writer = writer;
        let mut body = Box::pin(response.bytes_stream());
        let mut disconnected_at: Option<Instant> = None;

        loop {
            // Honor the grace window after the client went away.
            if let Some(at) = disconnected_at
                && at.elapsed() > grace
            {
                tracing::info!(digest = %expected, "grace period elapsed, abandoning warm");
                let _ = writer.abort().await;
                return;
            }

            match body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = writer.write(chunk.clone()).await {
                        tracing::warn!(error = %e, digest = %expected, "staging write failed");
                        let _ = writer.abort().await;
                        // Keep serving the client even if the cache leg died.
                        relay_remaining(sender, chunk, body).await;
                        return;
                    }
                    if disconnected_at.is_none() && sender.send(Ok(chunk)).await.is_err() {
                        tracing::debug!(digest = %expected, "client disconnected mid-stream, warming cache");
                        disconnected_at = Some(Instant::now());
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, digest = %expected, "upstream stream failed");
                    let _ = writer.abort().await;
                    let _ = sender
                        .send(Err(wharf_storage::StorageError::Io(std::io::Error::other(
                            format!("upstream stream failed: {e}"),
                        ))))
                        .await;
                    return;
                }
                None => break,
            }
        }

        match writer.commit(Some(&expected)).await {
            Ok((_, size)) => {
                if let Err(e) =
                    record_cached_blob(&task_state, &task_ctx, &task_image, &expected, size, &task_media_type)
                        .await
                {
                    tracing::warn!(error = %e, digest = %expected, "failed to record cached blob");
                }
            }
            Err(e) => {
                // Digest mismatch or storage failure: the cache stays cold,
                // the client already received the bytes as-is.
                tracing::warn!(error = %e, digest = %expected, "staging commit failed");
            }
        }
    });

    metrics::BLOBS_PULLED.inc();
    let stream = ReceiverStream::new(receiver);
    Ok(BlobRead {
        stream: Box::pin(stream),
        size,
        media_type,
    })
}

/// Drain the remainder of the remote body to the client when the staging
/// leg has failed.
async fn relay_remaining(
    sender: mpsc::Sender<StorageResult<Bytes>>,
    pending: Bytes,
    mut body: impl futures::Stream<Item = reqwest::Result<Bytes>> + Unpin,
) {
    if sender.send(Ok(pending)).await.is_err() {
        return;
    }
    while let Some(chunk) = body.next().await {
        let item = chunk.map_err(|e| {
            wharf_storage::StorageError::Io(std::io::Error::other(format!(
                "upstream stream failed: {e}"
            )))
        });
        if sender.send(item).await.is_err() {
            return;
        }
    }
}

/// Persist metadata for a freshly warmed blob so subsequent requests are
/// served locally, byte-identical.
async fn record_cached_blob(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: &Digest,
    size: u64,
    media_type: &str,
) -> OciResult<()> {
    let image = state
        .metadata
        .ensure_image(ctx.registry.id, image_name)
        .await?;
    let blob = state
        .metadata
        .ensure_blob(
            ctx.root_space.id,
            &digest.to_string(),
            size as i64,
            Some(media_type),
        )
        .await?;
    state
        .metadata
        .link_blob(ctx.registry.id, image.id, blob.id)
        .await?;
    tracing::info!(digest = %digest, size, "upstream blob cached");
    Ok(())
}

/// Remove the registry's reference to a blob. The CAS object and the shared
/// blob row stay; orphan collection is out of scope here.
pub async fn delete_blob(
    state: &AppState,
    ctx: &RegistryContext,
    digest: &Digest,
) -> OciResult<()> {
    let removed = state
        .metadata
        .unlink_blob(ctx.registry.id, &digest.to_string())
        .await?;
    if !removed {
        return Err(OciError::new(
            ErrorCode::BlobUnknown,
            format!("blob {digest} unknown"),
        ));
    }
    Ok(())
}
