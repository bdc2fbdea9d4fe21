//! Registry repository.

use crate::error::MetadataResult;
use crate::models::{NewRegistry, RegistryRow};
use async_trait::async_trait;

/// Repository for registry records.
#[async_trait]
pub trait RegistryRepo: Send + Sync {
    /// Create a registry. Fails if the name is taken within the space.
    async fn create_registry(&self, registry: &NewRegistry) -> MetadataResult<RegistryRow>;

    /// Get a registry by id.
    async fn get_registry(&self, id: i64) -> MetadataResult<Option<RegistryRow>>;

    /// Find a registry by `(root_space_id, name)`, the OCI path lookup.
    async fn find_registry(
        &self,
        root_space_id: i64,
        name: &str,
    ) -> MetadataResult<Option<RegistryRow>>;

    /// List registries under a space.
    async fn list_registries(&self, space_id: i64) -> MetadataResult<Vec<RegistryRow>>;

    /// Delete a registry, cascading tags, manifests, images, blob links, and
    /// upload sessions. Shared blob rows and CAS objects are kept.
    async fn delete_registry(&self, id: i64) -> MetadataResult<()>;
}
