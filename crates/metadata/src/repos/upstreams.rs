//! Upstream config repository.

use crate::error::MetadataResult;
use crate::models::{NewUpstreamConfig, UpstreamConfigRow};
use async_trait::async_trait;

/// Repository for upstream remote configurations.
#[async_trait]
pub trait UpstreamRepo: Send + Sync {
    /// Create an upstream config.
    async fn create_upstream_config(
        &self,
        config: &NewUpstreamConfig,
    ) -> MetadataResult<UpstreamConfigRow>;

    /// Get an upstream config by id.
    async fn get_upstream_config(&self, id: i64) -> MetadataResult<Option<UpstreamConfigRow>>;
}
