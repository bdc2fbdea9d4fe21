//! Download statistics repository.

use crate::error::MetadataResult;
use crate::models::DownloadStats;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for download events.
#[async_trait]
pub trait StatsRepo: Send + Sync {
    /// Record a manifest or blob download.
    async fn record_download(
        &self,
        registry_id: i64,
        image_id: i64,
        manifest_id: Option<i64>,
        blob_digest: Option<&str>,
        at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Aggregate download counters for an image.
    async fn download_stats(
        &self,
        registry_id: i64,
        image_id: i64,
    ) -> MetadataResult<DownloadStats>;
}
