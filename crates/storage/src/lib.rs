//! Content-addressed storage for the wharf artifact registry.
//!
//! Two layers:
//! - [`ObjectStore`]: a flat key/value object abstraction with filesystem
//!   and S3 backends.
//! - [`ContentStore`]: the content-addressed policy on top: digest-derived
//!   keys, hashing staged writes, idempotent commits.

pub mod backends;
pub mod cas;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use backends::s3::S3Backend;
pub use cas::{ContentStore, StagingWriter};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use std::sync::Arc;
use wharf_core::config::StorageConfig;

/// Build an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            Ok(Arc::new(FilesystemBackend::new(path).await?) as Arc<dyn ObjectStore>)
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => Ok(Arc::new(
            S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?,
        ) as Arc<dyn ObjectStore>),
    }
}
