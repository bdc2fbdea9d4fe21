//! Metadata store abstraction and implementations for wharf.
//!
//! This crate provides the control-plane data model:
//! - Spaces (tenant hierarchy) and registries
//! - Images, blobs, and registry-scoped blob links
//! - Manifests, manifest references, and tags
//! - Resumable upload sessions
//! - Upstream remote configurations
//! - Download statistics

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use wharf_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
