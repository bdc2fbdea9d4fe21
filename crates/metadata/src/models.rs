//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;
use wharf_core::registry::{PackageType, RegistryType, UpstreamAuthMode};

// =============================================================================
// Spaces
// =============================================================================

/// A node in the tenant hierarchy. Root spaces have no parent.
#[derive(Debug, Clone, FromRow)]
pub struct SpaceRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub identifier: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Registries
// =============================================================================

/// Registry record. `allowed_patterns` / `blocked_patterns` hold JSON string
/// arrays.
#[derive(Debug, Clone, FromRow)]
pub struct RegistryRow {
    pub id: i64,
    pub space_id: i64,
    pub root_space_id: i64,
    pub name: String,
    pub registry_type: String,
    pub package_type: String,
    pub allowed_patterns: String,
    pub blocked_patterns: String,
    pub upstream_config_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl RegistryRow {
    pub fn registry_type(&self) -> RegistryType {
        self.registry_type.parse().unwrap_or(RegistryType::Virtual)
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type.parse().unwrap_or(PackageType::Docker)
    }

    pub fn allowed(&self) -> Vec<String> {
        serde_json::from_str(&self.allowed_patterns).unwrap_or_default()
    }

    pub fn blocked(&self) -> Vec<String> {
        serde_json::from_str(&self.blocked_patterns).unwrap_or_default()
    }
}

/// Parameters for creating a registry.
#[derive(Debug, Clone)]
pub struct NewRegistry {
    pub space_id: i64,
    pub root_space_id: i64,
    pub name: String,
    pub registry_type: RegistryType,
    pub package_type: PackageType,
    pub allowed_patterns: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub upstream_config_id: Option<i64>,
}

// =============================================================================
// Images and blobs
// =============================================================================

/// Repository name inside a registry.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: i64,
    pub registry_id: i64,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Blob record. One row per `(root_space_id, digest)`; registries reference
/// blobs through `registry_blobs` links.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    pub id: i64,
    pub root_space_id: i64,
    pub digest: String,
    pub size: i64,
    pub media_type: Option<String>,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Manifests and tags
// =============================================================================

/// Manifest record. `payload` is the verbatim canonical bytes.
#[derive(Debug, Clone, FromRow)]
pub struct ManifestRow {
    pub id: i64,
    pub registry_id: i64,
    pub image_id: i64,
    pub digest: String,
    pub media_type: String,
    pub config_digest: Option<String>,
    pub subject_digest: Option<String>,
    pub artifact_type: Option<String>,
    pub total_size: i64,
    pub payload: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// Parameters for persisting a manifest.
#[derive(Debug, Clone)]
pub struct NewManifest {
    pub registry_id: i64,
    pub image_id: i64,
    pub digest: String,
    pub media_type: String,
    pub config_digest: Option<String>,
    pub subject_digest: Option<String>,
    pub artifact_type: Option<String>,
    pub total_size: i64,
    pub payload: Vec<u8>,
}

/// Child entry of an index / list manifest, declaration order preserved.
#[derive(Debug, Clone, FromRow)]
pub struct ManifestReferenceRow {
    pub manifest_id: i64,
    pub child_digest: String,
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub variant: Option<String>,
    pub position: i64,
}

/// Tag record. `version` is the row-version counter used for cross-process
/// compare-and-swap on tag writes.
#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    pub id: i64,
    pub registry_id: i64,
    pub image_id: i64,
    pub name: String,
    pub manifest_id: i64,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Upload sessions
// =============================================================================

/// Resumable upload session. Persisted so any node can accept follow-up
/// PATCHes; the offset only grows, guarded by compare-and-swap.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub id: Uuid,
    pub registry_id: i64,
    pub image_id: i64,
    pub state: String,
    pub offset: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Upstream configs and stats
// =============================================================================

/// Remote source configuration for an upstream registry.
#[derive(Debug, Clone, FromRow)]
pub struct UpstreamConfigRow {
    pub id: i64,
    pub url: String,
    pub auth_mode: String,
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure_tls: bool,
    pub created_at: OffsetDateTime,
}

impl UpstreamConfigRow {
    pub fn auth_mode(&self) -> UpstreamAuthMode {
        self.auth_mode.parse().unwrap_or(UpstreamAuthMode::Anonymous)
    }
}

/// Parameters for creating an upstream config.
#[derive(Debug, Clone)]
pub struct NewUpstreamConfig {
    pub url: String,
    pub auth_mode: UpstreamAuthMode,
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure_tls: bool,
}

/// Aggregated download counters for an image.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadStats {
    pub total: i64,
    pub manifests: i64,
    pub blobs: i64,
}
