//! Application state shared across handlers.

use crate::auth::{Authorizer, ConfigAuthorizer};
use crate::locks::LockRegistry;
use crate::upstream::UpstreamClient;
use std::sync::Arc;
use wharf_core::config::AppConfig;
use wharf_metadata::MetadataStore;
use wharf_storage::{ContentStore, ObjectStore};

/// Shared application state. Everything process-global (lock registry,
/// upstream token cache, circuit breakers) hangs off this one object,
/// constructed at init and torn down with it; nothing hides in implicit
/// singletons.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Content-addressed storage.
    pub cas: ContentStore,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// In-process tag/session locks.
    pub locks: Arc<LockRegistry>,
    /// Permission checks.
    pub authorizer: Arc<dyn Authorizer>,
    /// Upstream proxy client with its token cache and circuit breakers.
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    /// Create application state with the built-in config authorizer.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let authorizer: Arc<dyn Authorizer> = Arc::new(ConfigAuthorizer::new(&config.auth));
        Self::with_authorizer(config, storage, metadata, authorizer)
    }

    /// Create application state with a custom authorizer implementation.
    pub fn with_authorizer(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let upstream = Arc::new(UpstreamClient::new(config.upstream.clone()));
        Self {
            config: Arc::new(config),
            cas: ContentStore::new(storage),
            metadata,
            locks: Arc::new(LockRegistry::new()),
            authorizer,
            upstream,
        }
    }
}
