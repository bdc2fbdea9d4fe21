//! Tag repository.

use crate::error::MetadataResult;
use crate::models::TagRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for tag records.
#[async_trait]
pub trait TagRepo: Send + Sync {
    /// Point a tag at a manifest, creating it on first use. The row version
    /// increments on every write; the upsert itself is atomic, so
    /// concurrent writers linearize to last-write-wins.
    async fn upsert_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
        manifest_id: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<TagRow>;

    /// Find a tag by name.
    async fn find_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
    ) -> MetadataResult<Option<TagRow>>;

    /// Tag names of an image in lexical order, optionally after `last`,
    /// capped at `limit`.
    async fn list_tags(
        &self,
        registry_id: i64,
        image_id: i64,
        limit: i64,
        last: Option<&str>,
    ) -> MetadataResult<Vec<String>>;

    /// Refresh a tag's `updated_at` after upstream revalidation, without
    /// touching its version.
    async fn refresh_tag(&self, tag_id: i64, now: OffsetDateTime) -> MetadataResult<()>;

    /// Delete a tag. Returns whether a row was deleted.
    async fn delete_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
    ) -> MetadataResult<bool>;
}
