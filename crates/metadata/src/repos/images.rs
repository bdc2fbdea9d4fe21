//! Image repository.

use crate::error::MetadataResult;
use crate::models::ImageRow;
use async_trait::async_trait;

/// Repository for repository-name records inside registries.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Get an image by name, creating it on first reference.
    async fn ensure_image(&self, registry_id: i64, name: &str) -> MetadataResult<ImageRow>;

    /// Find an image by name.
    async fn find_image(&self, registry_id: i64, name: &str) -> MetadataResult<Option<ImageRow>>;

    /// List image names in a registry.
    async fn list_images(&self, registry_id: i64) -> MetadataResult<Vec<ImageRow>>;
}
