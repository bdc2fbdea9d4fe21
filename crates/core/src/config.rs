//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Realm advertised in `Www-Authenticate` challenges.
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Enable the /metrics endpoint for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_realm() -> String {
    "wharf".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            realm: default_realm(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite-backed metadata store.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/wharf.db"),
        }
    }
}

/// OCI distribution behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OciConfig {
    /// Emit relative `Location` URLs instead of absolute ones.
    #[serde(default)]
    pub relative_urls: bool,
    /// Maximum accepted manifest payload size in bytes.
    #[serde(default = "default_max_manifest_payload_bytes")]
    pub max_manifest_payload_bytes: u64,
    /// Maximum number of descriptor references per manifest.
    #[serde(default = "default_max_manifest_references")]
    pub max_manifest_references: u64,
    /// Idle TTL for upload sessions, in seconds.
    #[serde(default = "default_upload_idle_ttl_secs")]
    pub upload_idle_ttl_secs: u64,
    /// Interval between sweeps of expired upload sessions, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_manifest_payload_bytes() -> u64 {
    crate::DEFAULT_MAX_MANIFEST_PAYLOAD
}

fn default_max_manifest_references() -> u64 {
    crate::DEFAULT_MAX_MANIFEST_REFERENCES
}

fn default_upload_idle_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for OciConfig {
    fn default() -> Self {
        Self {
            relative_urls: false,
            max_manifest_payload_bytes: default_max_manifest_payload_bytes(),
            max_manifest_references: default_max_manifest_references(),
            upload_idle_ttl_secs: default_upload_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl OciConfig {
    /// Upload idle TTL as a Duration.
    pub fn upload_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_idle_ttl_secs)
    }

    /// Sweep interval as a Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Retry policy for upstream fetches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
    /// Jitter fraction applied to each delay (0.25 = +/-25%).
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    250
}

fn default_retry_factor() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
            jitter: default_retry_jitter(),
        }
    }
}

/// Circuit breaker policy per upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures within `window_secs` that open the circuit.
    #[serde(default = "default_circuit_failures")]
    pub failures: u32,
    #[serde(default = "default_circuit_window_secs")]
    pub window_secs: u64,
    /// How long the circuit stays open before half-opening.
    #[serde(default = "default_circuit_open_secs")]
    pub open_secs: u64,
}

fn default_circuit_failures() -> u32 {
    10
}

fn default_circuit_window_secs() -> u64 {
    30
}

fn default_circuit_open_secs() -> u64 {
    60
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failures: default_circuit_failures(),
            window_secs: default_circuit_window_secs(),
            open_secs: default_circuit_open_secs(),
        }
    }
}

/// Upstream proxy tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    /// Upper bound for cached bearer token TTLs, in seconds.
    #[serde(default = "default_token_cache_ttl_secs")]
    pub token_cache_ttl_secs: u64,
    /// Freshness window for cached tag -> manifest mappings, in seconds.
    #[serde(default = "default_tag_freshness_secs")]
    pub tag_freshness_secs: u64,
    /// Grace period granted to an in-flight upstream fetch after the client
    /// disconnects, so the cache still warms.
    #[serde(default = "default_disconnect_grace_secs")]
    pub client_disconnect_grace_secs: u64,
}

fn default_token_cache_ttl_secs() -> u64 {
    300
}

fn default_tag_freshness_secs() -> u64 {
    300
}

fn default_disconnect_grace_secs() -> u64 {
    30
}

impl UpstreamConfig {
    pub fn token_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl_secs)
    }

    pub fn tag_freshness(&self) -> Duration {
        Duration::from_secs(self.tag_freshness_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.client_disconnect_grace_secs)
    }
}

/// A statically configured user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// SHA-256 hex of the password. Generate with:
    /// `echo -n "password" | sha256sum`
    pub password_hash: String,
    /// Grant push (upload) permission.
    #[serde(default)]
    pub push: bool,
    /// Grant delete permission.
    #[serde(default)]
    pub delete: bool,
}

/// Authentication configuration.
///
/// Real deployments plug an external provider behind the `Authorizer` seam;
/// the built-in config users cover single-node setups and tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Allow unauthenticated pulls.
    #[serde(default = "default_anonymous_pull")]
    pub anonymous_pull: bool,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_anonymous_pull() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_pull: default_anonymous_pull(),
            users: Vec::new(),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub oci: OciConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Configuration suitable for tests: anonymous everything, small caps.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.auth.anonymous_pull = true;
        config.oci.sweep_interval_secs = 3600;
        config
    }
}
