//! Manifest repository.

use crate::error::MetadataResult;
use crate::models::{ManifestReferenceRow, ManifestRow, NewManifest};
use async_trait::async_trait;

/// Repository for manifest records.
#[async_trait]
pub trait ManifestRepo: Send + Sync {
    /// Persist a manifest and its child references in one transaction,
    /// idempotently on `(registry_id, image_id, digest)`. Returns the
    /// stored row (existing one on replays).
    async fn create_manifest(
        &self,
        manifest: &NewManifest,
        references: &[ManifestReferenceRow],
    ) -> MetadataResult<ManifestRow>;

    /// Get a manifest by id.
    async fn get_manifest(&self, id: i64) -> MetadataResult<Option<ManifestRow>>;

    /// Find a manifest by digest within an image.
    async fn find_manifest(
        &self,
        registry_id: i64,
        image_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<ManifestRow>>;

    /// Find a manifest by digest anywhere in a registry. Used when
    /// resolving list children pushed under sibling image names.
    async fn find_manifest_in_registry(
        &self,
        registry_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<ManifestRow>>;

    /// Child references of a list manifest, in declaration order.
    async fn get_manifest_references(
        &self,
        manifest_id: i64,
    ) -> MetadataResult<Vec<ManifestReferenceRow>>;

    /// Manifests whose `subject` points at `subject_digest`, oldest first.
    async fn find_referrers(
        &self,
        registry_id: i64,
        image_id: i64,
        subject_digest: &str,
    ) -> MetadataResult<Vec<ManifestRow>>;

    /// Delete a manifest (and its references and tags pointing at it).
    /// Returns whether a row was deleted.
    async fn delete_manifest(
        &self,
        registry_id: i64,
        image_id: i64,
        digest: &str,
    ) -> MetadataResult<bool>;
}
