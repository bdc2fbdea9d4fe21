//! Blob repository.

use crate::error::MetadataResult;
use crate::models::BlobRow;
use async_trait::async_trait;

/// Repository for blob records and their registry-scoped links.
///
/// Blob rows are per tenant root (`root_space_id`); registries reference
/// them through link rows so deleting a registry never orphans another
/// tenant registry's content.
#[async_trait]
pub trait BlobRepo: Send + Sync {
    /// Record a blob, idempotently on `(root_space_id, digest)`.
    async fn ensure_blob(
        &self,
        root_space_id: i64,
        digest: &str,
        size: i64,
        media_type: Option<&str>,
    ) -> MetadataResult<BlobRow>;

    /// Find a blob within a tenant root.
    async fn find_blob(&self, root_space_id: i64, digest: &str)
    -> MetadataResult<Option<BlobRow>>;

    /// Link a blob into a registry image.
    async fn link_blob(
        &self,
        registry_id: i64,
        image_id: i64,
        blob_id: i64,
    ) -> MetadataResult<()>;

    /// Remove a registry's links to a blob. Returns whether any link existed.
    async fn unlink_blob(&self, registry_id: i64, digest: &str) -> MetadataResult<bool>;
}
