//! Server test utilities.

use sha2::{Digest as Sha2Digest, Sha256};
use std::sync::Arc;
use tempfile::TempDir;
use wharf_core::config::{AppConfig, MetadataConfig, StorageConfig, UserConfig};
use wharf_core::registry::{PackageType, RegistryType, UpstreamAuthMode};
use wharf_metadata::models::{NewRegistry, NewUpstreamConfig, RegistryRow, SpaceRow};
use wharf_metadata::{MetadataStore, SqliteStore};
use wharf_server::{AppState, create_router};
use wharf_storage::{FilesystemBackend, ObjectStore};

/// Password used by the seeded `pusher` test user.
pub const TEST_PASSWORD: &str = "push-secret";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with anonymous pull and one push/delete user.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with config modifications applied.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("wharf.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
        };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        config.auth.users = vec![UserConfig {
            username: "pusher".to_string(),
            password_hash: sha256_hex(TEST_PASSWORD),
            push: true,
            delete: true,
        }];
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Seed a root space and a virtual registry under it.
    pub async fn seed_registry(&self, root: &str, name: &str) -> (SpaceRow, RegistryRow) {
        self.seed_registry_with_patterns(root, name, &[], &[]).await
    }

    /// Seed a virtual registry with allow/block patterns.
    pub async fn seed_registry_with_patterns(
        &self,
        root: &str,
        name: &str,
        allowed: &[&str],
        blocked: &[&str],
    ) -> (SpaceRow, RegistryRow) {
        let space = self.ensure_root(root).await;
        let registry = self
            .state
            .metadata
            .create_registry(&NewRegistry {
                space_id: space.id,
                root_space_id: space.id,
                name: name.to_string(),
                registry_type: RegistryType::Virtual,
                package_type: PackageType::Docker,
                allowed_patterns: allowed.iter().map(|s| s.to_string()).collect(),
                blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
                upstream_config_id: None,
            })
            .await
            .expect("failed to create registry");
        (space, registry)
    }

    /// Seed an upstream registry proxying `url`, with optional basic auth.
    pub async fn seed_upstream_registry(
        &self,
        root: &str,
        name: &str,
        url: &str,
        credentials: Option<(&str, &str)>,
    ) -> (SpaceRow, RegistryRow) {
        let space = self.ensure_root(root).await;
        let upstream = self
            .state
            .metadata
            .create_upstream_config(&NewUpstreamConfig {
                url: url.to_string(),
                auth_mode: if credentials.is_some() {
                    UpstreamAuthMode::Basic
                } else {
                    UpstreamAuthMode::Anonymous
                },
                namespace: None,
                username: credentials.map(|(user, _)| user.to_string()),
                password: credentials.map(|(_, password)| password.to_string()),
                insecure_tls: false,
            })
            .await
            .expect("failed to create upstream config");
        let registry = self
            .state
            .metadata
            .create_registry(&NewRegistry {
                space_id: space.id,
                root_space_id: space.id,
                name: name.to_string(),
                registry_type: RegistryType::Upstream,
                package_type: PackageType::Docker,
                allowed_patterns: vec![],
                blocked_patterns: vec![],
                upstream_config_id: Some(upstream.id),
            })
            .await
            .expect("failed to create registry");
        (space, registry)
    }

    async fn ensure_root(&self, root: &str) -> SpaceRow {
        match self
            .state
            .metadata
            .find_root_space(root)
            .await
            .expect("space lookup")
        {
            Some(space) => space,
            None => self
                .state
                .metadata
                .create_space(None, root)
                .await
                .expect("failed to create root space"),
        }
    }
}

/// Hex-encoded SHA-256 of a string, for config password hashes.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
