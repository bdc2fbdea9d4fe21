//! Space repository.

use crate::error::MetadataResult;
use crate::models::SpaceRow;
use async_trait::async_trait;

/// Repository for tenant space operations.
#[async_trait]
pub trait SpaceRepo: Send + Sync {
    /// Create a space under `parent_id` (None for a tenant root).
    async fn create_space(
        &self,
        parent_id: Option<i64>,
        identifier: &str,
    ) -> MetadataResult<SpaceRow>;

    /// Get a space by id.
    async fn get_space(&self, id: i64) -> MetadataResult<Option<SpaceRow>>;

    /// Find a root space by identifier, case-insensitively.
    async fn find_root_space(&self, identifier: &str) -> MetadataResult<Option<SpaceRow>>;

    /// Find a direct child space by identifier.
    async fn find_child_space(
        &self,
        parent_id: i64,
        identifier: &str,
    ) -> MetadataResult<Option<SpaceRow>>;

    /// Full path of a space from its root, `root/…/leaf`.
    async fn space_path(&self, id: i64) -> MetadataResult<String>;

    /// List root spaces.
    async fn list_root_spaces(&self) -> MetadataResult<Vec<SpaceRow>>;
}
