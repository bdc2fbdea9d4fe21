//! Manifest engine: parse, verify, persist, and resolve manifests.

use crate::access::RegistryContext;
use crate::error::{ErrorCode, OciError, OciResult};
use crate::locks::LockRegistry;
use crate::metrics;
use crate::state::AppState;
use bytes::Bytes;
use wharf_core::digest::Digest;
use wharf_core::manifest::{self, Manifest};
use wharf_core::reference::validate_tag;
use wharf_metadata::models::{ImageRow, ManifestReferenceRow, ManifestRow, NewManifest};

/// How strictly to verify manifest references.
///
/// Virtual registries enforce closure; upstream cache commits tolerate
/// missing blobs and children, which are fetched lazily on pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    Strict,
    Tolerant,
}

/// Outcome of a manifest PUT.
#[derive(Debug)]
pub struct PutOutcome {
    pub digest: Digest,
    pub subject_digest: Option<Digest>,
}

/// A manifest resolved for serving.
#[derive(Debug)]
pub struct ResolvedManifest {
    pub payload: Bytes,
    pub media_type: String,
    pub digest: Digest,
}

impl From<ManifestRow> for ResolvedManifest {
    fn from(row: ManifestRow) -> Self {
        Self {
            payload: Bytes::from(row.payload),
            media_type: row.media_type,
            // Stored digests are canonical; parse cannot fail.
            digest: Digest::parse(&row.digest).expect("stored digest"),
        }
    }
}

/// Client platform for manifest-list selection, parsed from `User-Agent`
/// fragments like `os/linux arch/arm64`. Docker and containerd both send
/// them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientPlatform {
    pub os: String,
    pub architecture: String,
}

impl Default for ClientPlatform {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
        }
    }
}

impl ClientPlatform {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let mut platform = Self::default();
        let Some(ua) = user_agent else {
            return platform;
        };
        for token in ua.split_whitespace() {
            if let Some(os) = token.strip_prefix("os/") {
                platform.os = os.to_string();
            } else if let Some(arch) = token.strip_prefix("arch/") {
                platform.architecture = arch.to_string();
            }
        }
        platform
    }
}

/// Whether the Accept header admits manifest-list media types. Clients that
/// do not advertise them get a concrete child selected.
pub fn accepts_lists(accept: Option<&str>) -> bool {
    match accept {
        None => true,
        Some(accept) => accept.split(',').map(str::trim).any(|t| {
            let t = t.split(';').next().unwrap_or(t).trim();
            manifest::is_list_media_type(t) || t == "*/*" || t == "application/*"
        }),
    }
}

/// Store a manifest pushed by a client (or fetched from an upstream).
///
/// Verifies the payload against the caps and blob closure, then
/// persists image -> manifest -> tag inside the engine's ordering. The
/// returned digest is always the digest of `payload`, even when a
/// concurrent writer won a tag race.
pub async fn put_manifest(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    reference: &str,
    content_type: Option<&str>,
    payload: Bytes,
    mode: VerifyMode,
) -> OciResult<PutOutcome> {
    let caps = &state.config.oci;
    if payload.len() as u64 > caps.max_manifest_payload_bytes {
        return Err(OciError::new(
            ErrorCode::PayloadTooLarge,
            format!(
                "manifest payload {} exceeds limit {}",
                payload.len(),
                caps.max_manifest_payload_bytes
            ),
        ));
    }

    let parsed = Manifest::parse(content_type, &payload)
        .map_err(|e| OciError::new(ErrorCode::ManifestInvalid, e.to_string()))?;

    let digest = Digest::sha256(&payload);

    // A digest reference must match the payload exactly.
    let tag = match Digest::parse(reference) {
        Ok(expected) => {
            if expected != digest {
                return Err(OciError::new(
                    ErrorCode::DigestInvalid,
                    "reference digest does not match payload",
                ));
            }
            None
        }
        Err(_) => {
            validate_tag(reference)
                .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid tag"))?;
            Some(reference.to_string())
        }
    };

    let references = parsed.references();
    if references.len() as u64 > caps.max_manifest_references {
        return Err(OciError::new(
            ErrorCode::ReferencesExceedLimit,
            format!(
                "manifest references {} exceed limit {}",
                references.len(),
                caps.max_manifest_references
            ),
        ));
    }

    // Manifests never reference themselves (acyclicity).
    if references.iter().any(|d| d.digest == digest) {
        return Err(OciError::new(
            ErrorCode::ManifestInvalid,
            "manifest references its own digest",
        ));
    }

    let image = state
        .metadata
        .ensure_image(ctx.registry.id, image_name)
        .await?;

    let child_rows = verify_manifest(state, ctx, &image, &parsed, mode).await?;

    let new_manifest = NewManifest {
        registry_id: ctx.registry.id,
        image_id: image.id,
        digest: digest.to_string(),
        media_type: parsed.media_type().to_string(),
        config_digest: parsed.config().map(|c| c.digest.to_string()),
        subject_digest: parsed.subject().map(|s| s.digest.to_string()),
        artifact_type: parsed.artifact_type().map(|s| s.to_string()),
        total_size: total_size(&parsed, payload.len() as i64),
        payload: payload.to_vec(),
    };
    let row = state.metadata.create_manifest(&new_manifest, &child_rows).await?;

    if let Some(tag) = tag {
        // Per-tag lock linearizes in-process writers; the row-version
        // upsert in the store covers cross-process ones.
        let key = LockRegistry::tag_key(ctx.registry.id, image.id, &tag);
        let _guard = state.locks.acquire(&key).await;
        state
            .metadata
            .upsert_tag(
                ctx.registry.id,
                image.id,
                &tag,
                row.id,
                time::OffsetDateTime::now_utc(),
            )
            .await?;
    }

    metrics::MANIFESTS_PUSHED.inc();
    tracing::info!(
        registry = %ctx.registry.name,
        image = %image_name,
        digest = %digest,
        media_type = %parsed.media_type(),
        "manifest stored"
    );

    Ok(PutOutcome {
        digest,
        subject_digest: parsed.subject().map(|s| s.digest.clone()),
    })
}

fn total_size(parsed: &Manifest, payload_len: i64) -> i64 {
    payload_len + parsed.references().iter().map(|d| d.size).sum::<i64>()
}

/// Closure verification: every referenced blob or child must already be
/// accounted for. Returns the child reference rows for lists.
async fn verify_manifest(
    state: &AppState,
    ctx: &RegistryContext,
    image: &ImageRow,
    parsed: &Manifest,
    mode: VerifyMode,
) -> OciResult<Vec<ManifestReferenceRow>> {
    match parsed {
        Manifest::Image { manifest, .. } => {
            for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
                let blob = state
                    .metadata
                    .find_blob(ctx.root_space.id, &descriptor.digest.to_string())
                    .await?;
                match blob {
                    Some(blob) => {
                        if blob.size != descriptor.size {
                            return Err(OciError::new(
                                ErrorCode::SizeInvalid,
                                format!(
                                    "descriptor {} declares {} bytes, blob has {}",
                                    descriptor.digest, descriptor.size, blob.size
                                ),
                            ));
                        }
                        state
                            .metadata
                            .link_blob(ctx.registry.id, image.id, blob.id)
                            .await?;
                    }
                    None if mode == VerifyMode::Tolerant => {
                        // Upstream cache commit: blobs arrive lazily on pull.
                        tracing::debug!(digest = %descriptor.digest, "deferred blob for upstream manifest");
                    }
                    None => {
                        return Err(OciError::new(
                            ErrorCode::ManifestBlobUnknown,
                            format!("blob {} not present in tenant", descriptor.digest),
                        ));
                    }
                }
            }
            Ok(Vec::new())
        }
        Manifest::List { list, .. } => {
            let mut rows = Vec::new();
            let mut seen = std::collections::HashSet::new();
            for descriptor in &list.manifests {
                // Duplicate children collapse; platforms are carried verbatim.
                if !seen.insert(descriptor.digest.to_string()) {
                    continue;
                }

                let resolvable = state
                    .metadata
                    .find_manifest_in_registry(ctx.registry.id, &descriptor.digest.to_string())
                    .await?
                    .is_some();
                if !resolvable {
                    if mode == VerifyMode::Strict {
                        return Err(OciError::new(
                            ErrorCode::ManifestBlobUnknown,
                            format!("child manifest {} not present", descriptor.digest),
                        ));
                    }
                    // Tolerated: fetched lazily on pull. The counter lets
                    // operators spot upstream drift.
                    metrics::MANIFEST_LIST_MISSING_CHILDREN.inc();
                    tracing::warn!(
                        digest = %descriptor.digest,
                        registry = %ctx.registry.name,
                        "manifest list child missing, skipped"
                    );
                }

                rows.push(ManifestReferenceRow {
                    manifest_id: 0, // assigned on insert
                    child_digest: descriptor.digest.to_string(),
                    os: descriptor.platform.as_ref().map(|p| p.os.clone()),
                    architecture: descriptor
                        .platform
                        .as_ref()
                        .map(|p| p.architecture.clone()),
                    variant: descriptor.platform.as_ref().and_then(|p| p.variant.clone()),
                    position: (rows.len()) as i64,
                });
            }
            Ok(rows)
        }
    }
}

/// Resolve a manifest for GET/HEAD.
///
/// Tag references on upstream registries honor the freshness window: stale
/// tags revalidate against the remote with a HEAD and refetch on digest
/// drift, falling back to the cached manifest when the remote is down.
/// When the stored object is a list and the client does not accept lists,
/// a concrete child is selected by exact `(os, arch)` match, first in
/// declaration order; no match falls back to the list itself.
pub async fn get_manifest(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: Option<&Digest>,
    tag: Option<&str>,
    accept: Option<&str>,
    platform: &ClientPlatform,
) -> OciResult<ResolvedManifest> {
    let image = state.metadata.find_image(ctx.registry.id, image_name).await?;

    let row = match (digest, tag) {
        (Some(digest), _) => By::digest(state, ctx, image.as_ref(), image_name, digest).await?,
        (None, Some(tag)) => By::tag(state, ctx, image.as_ref(), image_name, tag).await?,
        (None, None) => {
            return Err(OciError::new(ErrorCode::ManifestInvalid, "missing reference"));
        }
    };

    // Fire-and-forget download accounting.
    {
        let metadata = state.metadata.clone();
        let registry_id = row.registry_id;
        let image_id = row.image_id;
        let manifest_id = row.id;
        tokio::spawn(async move {
            let _ = metadata
                .record_download(
                    registry_id,
                    image_id,
                    Some(manifest_id),
                    None,
                    time::OffsetDateTime::now_utc(),
                )
                .await;
        });
    }

    let resolved = walk_list(state, ctx, image_name, row, accept, platform).await?;
    metrics::MANIFESTS_PULLED.inc();
    Ok(resolved)
}

/// Resolution helpers split by reference kind.
struct By;

impl By {
    async fn digest(
        state: &AppState,
        ctx: &RegistryContext,
        image: Option<&ImageRow>,
        image_name: &str,
        digest: &Digest,
    ) -> OciResult<ManifestRow> {
        if let Some(image) = image
            && let Some(row) = state
                .metadata
                .find_manifest(ctx.registry.id, image.id, &digest.to_string())
                .await?
        {
            if ctx.is_upstream() {
                metrics::UPSTREAM_CACHE_HITS.inc();
            }
            return Ok(row);
        }

        if ctx.is_upstream() {
            return fetch_and_cache(state, ctx, image_name, &digest.to_string(), None).await;
        }

        Err(OciError::new(
            ErrorCode::ManifestUnknown,
            format!("manifest {digest} unknown"),
        ))
    }

    async fn tag(
        state: &AppState,
        ctx: &RegistryContext,
        image: Option<&ImageRow>,
        image_name: &str,
        tag: &str,
    ) -> OciResult<ManifestRow> {
        let cached = match image {
            Some(image) => {
                match state.metadata.find_tag(ctx.registry.id, image.id, tag).await? {
                    Some(tag_row) => {
                        let manifest = state
                            .metadata
                            .get_manifest(tag_row.manifest_id)
                            .await?
                            .ok_or_else(|| {
                                OciError::internal("tag points at a missing manifest")
                            })?;
                        Some((tag_row, manifest))
                    }
                    None => None,
                }
            }
            None => None,
        };

        if !ctx.is_upstream() {
            return cached.map(|(_, manifest)| manifest).ok_or_else(|| {
                OciError::new(ErrorCode::ManifestUnknown, format!("manifest {tag} unknown"))
            });
        }

        // Upstream: fresh cached tags are served locally; stale ones
        // revalidate with a HEAD before being trusted again.
        if let Some((tag_row, manifest)) = cached {
            let age = time::OffsetDateTime::now_utc() - tag_row.updated_at;
            let freshness =
                time::Duration::seconds(state.upstream.tuning().tag_freshness_secs as i64);
            if age <= freshness {
                metrics::UPSTREAM_CACHE_HITS.inc();
                return Ok(manifest);
            }

            let upstream_config = upstream_config(state, ctx).await?;
            match state
                .upstream
                .head_manifest(&upstream_config, image_name, tag)
                .await
            {
                Ok(Some(remote_digest)) if remote_digest.to_string() == manifest.digest => {
                    state
                        .metadata
                        .refresh_tag(tag_row.id, time::OffsetDateTime::now_utc())
                        .await?;
                    metrics::UPSTREAM_CACHE_HITS.inc();
                    return Ok(manifest);
                }
                Ok(_) => {
                    // Drifted or header missing: refetch below.
                }
                Err(e) => {
                    // An unreachable upstream never invalidates the cache.
                    tracing::warn!(error = %e, tag = %tag, "revalidation failed, serving cached tag");
                    return Ok(manifest);
                }
            }
        }

        fetch_and_cache(state, ctx, image_name, tag, Some(tag)).await
    }
}

async fn upstream_config(
    state: &AppState,
    ctx: &RegistryContext,
) -> OciResult<wharf_metadata::models::UpstreamConfigRow> {
    let id = ctx.registry.upstream_config_id.ok_or_else(|| {
        OciError::internal("upstream registry without upstream config")
    })?;
    state
        .metadata
        .get_upstream_config(id)
        .await?
        .ok_or_else(|| OciError::internal("upstream config missing"))
}

/// Pull a manifest from the remote, commit it locally (tolerant), and
/// upsert the tag mapping when fetched by tag.
async fn fetch_and_cache(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    reference: &str,
    tag: Option<&str>,
) -> OciResult<ManifestRow> {
    let upstream_config = upstream_config(state, ctx).await?;
    let remote = state
        .upstream
        .fetch_manifest(
            &upstream_config,
            image_name,
            reference,
            state.config.oci.max_manifest_payload_bytes,
        )
        .await?
        .ok_or_else(|| {
            OciError::new(
                ErrorCode::ManifestUnknown,
                format!("manifest {reference} unknown upstream"),
            )
        })?;

    // A digest-addressed fetch must return exactly those bytes.
    if let Ok(requested) = Digest::parse(reference)
        && requested != remote.digest
    {
        return Err(OciError::bad_gateway(format!(
            "upstream returned digest {} for requested {requested}",
            remote.digest
        )));
    }

    // Commit exactly as a virtual push would, minus closure strictness;
    // tag upsert rides along inside put_manifest, so the next request for
    // this digest is served locally.
    let commit_reference = tag.map(str::to_string).unwrap_or_else(|| remote.digest.to_string());
    put_manifest(
        state,
        ctx,
        image_name,
        &commit_reference,
        Some(&remote.media_type),
        remote.payload,
        VerifyMode::Tolerant,
    )
    .await?;

    let image = state
        .metadata
        .find_image(ctx.registry.id, image_name)
        .await?
        .ok_or_else(|| OciError::internal("image missing after cache commit"))?;
    state
        .metadata
        .find_manifest(ctx.registry.id, image.id, &remote.digest.to_string())
        .await?
        .ok_or_else(|| OciError::internal("manifest missing after cache commit"))
}

/// Manifest-list walk. Tie-break on multiple platform matches: first in
/// declaration order.
async fn walk_list(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    row: ManifestRow,
    accept: Option<&str>,
    platform: &ClientPlatform,
) -> OciResult<ResolvedManifest> {
    if !manifest::is_list_media_type(&row.media_type) || accepts_lists(accept) {
        return Ok(row.into());
    }

    let references = state.metadata.get_manifest_references(row.id).await?;
    let child = references.iter().find(|r| {
        r.os.as_deref() == Some(platform.os.as_str())
            && r.architecture.as_deref() == Some(platform.architecture.as_str())
    });

    let Some(child) = child else {
        // No platform match: the list itself is the answer.
        return Ok(row.into());
    };

    if let Some(child_row) = state
        .metadata
        .find_manifest_in_registry(ctx.registry.id, &child.child_digest)
        .await?
    {
        return Ok(child_row.into());
    }

    if ctx.is_upstream() {
        // Child was tolerated as missing at list commit; fetch it now.
        let child_row =
            fetch_and_cache(state, ctx, image_name, &child.child_digest, None).await?;
        return Ok(child_row.into());
    }

    Err(OciError::new(
        ErrorCode::ManifestUnknown,
        format!("child manifest {} unknown", child.child_digest),
    ))
}

/// Delete a manifest by digest, or just the tag when referenced by name.
pub async fn delete_manifest(
    state: &AppState,
    ctx: &RegistryContext,
    image_name: &str,
    digest: Option<&Digest>,
    tag: Option<&str>,
) -> OciResult<()> {
    let image = state
        .metadata
        .find_image(ctx.registry.id, image_name)
        .await?
        .ok_or_else(|| OciError::new(ErrorCode::NameUnknown, "repository unknown"))?;

    match (digest, tag) {
        (Some(digest), _) => {
            let deleted = state
                .metadata
                .delete_manifest(ctx.registry.id, image.id, &digest.to_string())
                .await?;
            if !deleted {
                return Err(OciError::new(
                    ErrorCode::ManifestUnknown,
                    format!("manifest {digest} unknown"),
                ));
            }
            Ok(())
        }
        (None, Some(tag)) => {
            let deleted = state
                .metadata
                .delete_tag(ctx.registry.id, image.id, tag)
                .await?;
            if !deleted {
                return Err(OciError::new(
                    ErrorCode::ManifestUnknown,
                    format!("tag {tag} unknown"),
                ));
            }
            Ok(())
        }
        (None, None) => Err(OciError::new(
            ErrorCode::Unsupported,
            "missing manifest reference",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_platform_from_docker_user_agent() {
        let ua = "docker/24.0.5 go/go1.20.6 git-commit/abc kernel/6.1 os/linux arch/arm64";
        let platform = ClientPlatform::from_user_agent(Some(ua));
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.architecture, "arm64");
    }

    #[test]
    fn client_platform_defaults_to_linux_amd64() {
        let platform = ClientPlatform::from_user_agent(None);
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.architecture, "amd64");
        let platform = ClientPlatform::from_user_agent(Some("curl/8.0"));
        assert_eq!(platform.architecture, "amd64");
    }

    #[test]
    fn accept_header_list_detection() {
        assert!(accepts_lists(None));
        assert!(accepts_lists(Some("*/*")));
        assert!(accepts_lists(Some(
            "application/vnd.oci.image.index.v1+json, application/vnd.oci.image.manifest.v1+json"
        )));
        assert!(accepts_lists(Some(
            "application/vnd.docker.distribution.manifest.list.v2+json;q=0.9"
        )));
        assert!(!accepts_lists(Some(
            "application/vnd.docker.distribution.manifest.v2+json"
        )));
        assert!(!accepts_lists(Some("application/vnd.oci.image.manifest.v1+json")));
    }
}
