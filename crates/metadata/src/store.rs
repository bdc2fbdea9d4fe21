//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    BlobRow, DownloadStats, ImageRow, ManifestReferenceRow, ManifestRow, NewManifest, NewRegistry,
    NewUpstreamConfig, RegistryRow, SpaceRow, TagRow, UploadSessionRow, UpstreamConfigRow,
};
use crate::repos::{
    BlobRepo, ImageRepo, ManifestRepo, RegistryRepo, SpaceRepo, StatsRepo, TagRepo, UploadRepo,
    UpstreamRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    SpaceRepo
    + RegistryRepo
    + ImageRepo
    + BlobRepo
    + ManifestRepo
    + TagRepo
    + UploadRepo
    + UpstreamRepo
    + StatsRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(MetadataError::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        MetadataStore::migrate(&store).await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS spaces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES spaces(id),
        identifier TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_spaces_parent_identifier
        ON spaces(ifnull(parent_id, 0), identifier COLLATE NOCASE)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS upstream_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        auth_mode TEXT NOT NULL,
        namespace TEXT,
        username TEXT,
        password TEXT,
        insecure_tls INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS registries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        space_id INTEGER NOT NULL REFERENCES spaces(id),
        root_space_id INTEGER NOT NULL REFERENCES spaces(id),
        name TEXT NOT NULL,
        registry_type TEXT NOT NULL,
        package_type TEXT NOT NULL,
        allowed_patterns TEXT NOT NULL DEFAULT '[]',
        blocked_patterns TEXT NOT NULL DEFAULT '[]',
        upstream_config_id INTEGER REFERENCES upstream_configs(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (root_space_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (registry_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root_space_id INTEGER NOT NULL REFERENCES spaces(id),
        digest TEXT NOT NULL,
        size INTEGER NOT NULL,
        media_type TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (root_space_id, digest)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS registry_blobs (
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        image_id INTEGER NOT NULL REFERENCES images(id),
        blob_id INTEGER NOT NULL REFERENCES blobs(id),
        PRIMARY KEY (registry_id, image_id, blob_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS manifests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        image_id INTEGER NOT NULL REFERENCES images(id),
        digest TEXT NOT NULL,
        media_type TEXT NOT NULL,
        config_digest TEXT,
        subject_digest TEXT,
        artifact_type TEXT,
        total_size INTEGER NOT NULL,
        payload BLOB NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (registry_id, image_id, digest)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_manifests_subject
        ON manifests(registry_id, image_id, subject_digest)
        WHERE subject_digest IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS manifest_references (
        manifest_id INTEGER NOT NULL REFERENCES manifests(id) ON DELETE CASCADE,
        child_digest TEXT NOT NULL,
        os TEXT,
        architecture TEXT,
        variant TEXT,
        position INTEGER NOT NULL,
        PRIMARY KEY (manifest_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        image_id INTEGER NOT NULL REFERENCES images(id),
        name TEXT NOT NULL,
        manifest_id INTEGER NOT NULL REFERENCES manifests(id),
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (registry_id, image_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS upload_sessions (
        id BLOB PRIMARY KEY,
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        image_id INTEGER NOT NULL REFERENCES images(id),
        state TEXT NOT NULL,
        "offset" INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_upload_sessions_state_updated
        ON upload_sessions(state, updated_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        registry_id INTEGER NOT NULL REFERENCES registries(id),
        image_id INTEGER NOT NULL REFERENCES images(id),
        manifest_id INTEGER,
        blob_digest TEXT,
        downloaded_at TEXT NOT NULL
    )
    "#,
];

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SpaceRepo for SqliteStore {
    async fn create_space(
        &self,
        parent_id: Option<i64>,
        identifier: &str,
    ) -> MetadataResult<SpaceRow> {
        let now = OffsetDateTime::now_utc();
        let result =
            sqlx::query("INSERT INTO spaces (parent_id, identifier, created_at) VALUES (?, ?, ?)")
                .bind(parent_id)
                .bind(identifier)
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(SpaceRow {
            id: result.last_insert_rowid(),
            parent_id,
            identifier: identifier.to_string(),
            created_at: now,
        })
    }

    async fn get_space(&self, id: i64) -> MetadataResult<Option<SpaceRow>> {
        let row = sqlx::query_as::<_, SpaceRow>("SELECT * FROM spaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_root_space(&self, identifier: &str) -> MetadataResult<Option<SpaceRow>> {
        let row = sqlx::query_as::<_, SpaceRow>(
            "SELECT * FROM spaces WHERE parent_id IS NULL AND identifier = ? COLLATE NOCASE",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_child_space(
        &self,
        parent_id: i64,
        identifier: &str,
    ) -> MetadataResult<Option<SpaceRow>> {
        let row = sqlx::query_as::<_, SpaceRow>(
            "SELECT * FROM spaces WHERE parent_id = ? AND identifier = ? COLLATE NOCASE",
        )
        .bind(parent_id)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn space_path(&self, id: i64) -> MetadataResult<String> {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let space = self
                .get_space(current)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("space {current}")))?;
            segments.push(space.identifier);
            cursor = space.parent_id;
        }
        segments.reverse();
        Ok(segments.join("/"))
    }

    async fn list_root_spaces(&self) -> MetadataResult<Vec<SpaceRow>> {
        let rows = sqlx::query_as::<_, SpaceRow>(
            "SELECT * FROM spaces WHERE parent_id IS NULL ORDER BY identifier",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RegistryRepo for SqliteStore {
    async fn create_registry(&self, registry: &NewRegistry) -> MetadataResult<RegistryRow> {
        let now = OffsetDateTime::now_utc();
        let allowed = serde_json::to_string(&registry.allowed_patterns)?;
        let blocked = serde_json::to_string(&registry.blocked_patterns)?;

        let result = sqlx::query(
            r#"
            INSERT INTO registries (
                space_id, root_space_id, name, registry_type, package_type,
                allowed_patterns, blocked_patterns, upstream_config_id,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(registry.space_id)
        .bind(registry.root_space_id)
        .bind(&registry.name)
        .bind(registry.registry_type.as_str())
        .bind(registry.package_type.as_str())
        .bind(&allowed)
        .bind(&blocked)
        .bind(registry.upstream_config_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(RegistryRow {
            id: result.last_insert_rowid(),
            space_id: registry.space_id,
            root_space_id: registry.root_space_id,
            name: registry.name.clone(),
            registry_type: registry.registry_type.as_str().to_string(),
            package_type: registry.package_type.as_str().to_string(),
            allowed_patterns: allowed,
            blocked_patterns: blocked,
            upstream_config_id: registry.upstream_config_id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_registry(&self, id: i64) -> MetadataResult<Option<RegistryRow>> {
        let row = sqlx::query_as::<_, RegistryRow>("SELECT * FROM registries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_registry(
        &self,
        root_space_id: i64,
        name: &str,
    ) -> MetadataResult<Option<RegistryRow>> {
        let row = sqlx::query_as::<_, RegistryRow>(
            "SELECT * FROM registries WHERE root_space_id = ? AND name = ?",
        )
        .bind(root_space_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_registries(&self, space_id: i64) -> MetadataResult<Vec<RegistryRow>> {
        let rows = sqlx::query_as::<_, RegistryRow>(
            "SELECT * FROM registries WHERE space_id = ? ORDER BY name",
        )
        .bind(space_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_registry(&self, id: i64) -> MetadataResult<()> {
        // Cascade order matters under foreign keys: stats and tags first,
        // then manifests (references cascade), links, sessions, images.
        // Blob rows and CAS objects are shared per tenant and stay.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM download_stats WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM manifest_references WHERE manifest_id IN
                 (SELECT id FROM manifests WHERE registry_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM manifests WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM registry_blobs WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM upload_sessions WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM images WHERE registry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM registries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for SqliteStore {
    async fn ensure_image(&self, registry_id: i64, name: &str) -> MetadataResult<ImageRow> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO images (registry_id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT (registry_id, name) DO NOTHING",
        )
        .bind(registry_id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_image(registry_id, name)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("image {name}")))
    }

    async fn find_image(&self, registry_id: i64, name: &str) -> MetadataResult<Option<ImageRow>> {
        let row = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE registry_id = ? AND name = ?",
        )
        .bind(registry_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_images(&self, registry_id: i64) -> MetadataResult<Vec<ImageRow>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images WHERE registry_id = ? ORDER BY name",
        )
        .bind(registry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl BlobRepo for SqliteStore {
    async fn ensure_blob(
        &self,
        root_space_id: i64,
        digest: &str,
        size: i64,
        media_type: Option<&str>,
    ) -> MetadataResult<BlobRow> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO blobs (root_space_id, digest, size, media_type, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (root_space_id, digest) DO NOTHING",
        )
        .bind(root_space_id)
        .bind(digest)
        .bind(size)
        .bind(media_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_blob(root_space_id, digest)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("blob {digest}")))
    }

    async fn find_blob(
        &self,
        root_space_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>(
            "SELECT * FROM blobs WHERE root_space_id = ? AND digest = ?",
        )
        .bind(root_space_id)
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn link_blob(
        &self,
        registry_id: i64,
        image_id: i64,
        blob_id: i64,
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO registry_blobs (registry_id, image_id, blob_id) VALUES (?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(blob_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unlink_blob(&self, registry_id: i64, digest: &str) -> MetadataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM registry_blobs WHERE registry_id = ? AND blob_id IN
                 (SELECT id FROM blobs WHERE digest = ?)",
        )
        .bind(registry_id)
        .bind(digest)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ManifestRepo for SqliteStore {
    async fn create_manifest(
        &self,
        manifest: &NewManifest,
        references: &[ManifestReferenceRow],
    ) -> MetadataResult<ManifestRow> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        // Idempotent on digest: a replayed PUT observes the original row.
        let existing = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests WHERE registry_id = ? AND image_id = ? AND digest = ?",
        )
        .bind(manifest.registry_id)
        .bind(manifest.image_id)
        .bind(&manifest.digest)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(row);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO manifests (
                registry_id, image_id, digest, media_type, config_digest,
                subject_digest, artifact_type, total_size, payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(manifest.registry_id)
        .bind(manifest.image_id)
        .bind(&manifest.digest)
        .bind(&manifest.media_type)
        .bind(&manifest.config_digest)
        .bind(&manifest.subject_digest)
        .bind(&manifest.artifact_type)
        .bind(manifest.total_size)
        .bind(&manifest.payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let manifest_id = result.last_insert_rowid();

        for reference in references {
            sqlx::query(
                r#"
                INSERT INTO manifest_references (
                    manifest_id, child_digest, os, architecture, variant, position
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(manifest_id)
            .bind(&reference.child_digest)
            .bind(&reference.os)
            .bind(&reference.architecture)
            .bind(&reference.variant)
            .bind(reference.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ManifestRow {
            id: manifest_id,
            registry_id: manifest.registry_id,
            image_id: manifest.image_id,
            digest: manifest.digest.clone(),
            media_type: manifest.media_type.clone(),
            config_digest: manifest.config_digest.clone(),
            subject_digest: manifest.subject_digest.clone(),
            artifact_type: manifest.artifact_type.clone(),
            total_size: manifest.total_size,
            payload: manifest.payload.clone(),
            created_at: now,
        })
    }

    async fn get_manifest(&self, id: i64) -> MetadataResult<Option<ManifestRow>> {
        let row = sqlx::query_as::<_, ManifestRow>("SELECT * FROM manifests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_manifest(
        &self,
        registry_id: i64,
        image_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<ManifestRow>> {
        let row = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests WHERE registry_id = ? AND image_id = ? AND digest = ?",
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_manifest_in_registry(
        &self,
        registry_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<ManifestRow>> {
        let row = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests WHERE registry_id = ? AND digest = ? ORDER BY id LIMIT 1",
        )
        .bind(registry_id)
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_manifest_references(
        &self,
        manifest_id: i64,
    ) -> MetadataResult<Vec<ManifestReferenceRow>> {
        let rows = sqlx::query_as::<_, ManifestReferenceRow>(
            "SELECT * FROM manifest_references WHERE manifest_id = ? ORDER BY position",
        )
        .bind(manifest_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_referrers(
        &self,
        registry_id: i64,
        image_id: i64,
        subject_digest: &str,
    ) -> MetadataResult<Vec<ManifestRow>> {
        let rows = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests
             WHERE registry_id = ? AND image_id = ? AND subject_digest = ?
             ORDER BY created_at, id",
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(subject_digest)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_manifest(
        &self,
        registry_id: i64,
        image_id: i64,
        digest: &str,
    ) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(manifest) = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM manifests WHERE registry_id = ? AND image_id = ? AND digest = ?",
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(digest)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.commit().await?;
            return Ok(false);
        };

        sqlx::query("DELETE FROM tags WHERE manifest_id = ?")
            .bind(manifest.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifest_references WHERE manifest_id = ?")
            .bind(manifest.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifests WHERE id = ?")
            .bind(manifest.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl TagRepo for SqliteStore {
    async fn upsert_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
        manifest_id: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<TagRow> {
        // The upsert is a single atomic statement; the version column
        // increments on every overwrite so cross-process writers can detect
        // lost races.
        sqlx::query(
            r#"
            INSERT INTO tags (registry_id, image_id, name, manifest_id, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT (registry_id, image_id, name) DO UPDATE SET
                manifest_id = excluded.manifest_id,
                version = version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(name)
        .bind(manifest_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_tag(registry_id, image_id, name)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("tag {name}")))
    }

    async fn find_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
    ) -> MetadataResult<Option<TagRow>> {
        let row = sqlx::query_as::<_, TagRow>(
            "SELECT * FROM tags WHERE registry_id = ? AND image_id = ? AND name = ?",
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_tags(
        &self,
        registry_id: i64,
        image_id: i64,
        limit: i64,
        last: Option<&str>,
    ) -> MetadataResult<Vec<String>> {
        let rows: Vec<(String,)> = match last {
            Some(last) => {
                sqlx::query_as(
                    "SELECT name FROM tags WHERE registry_id = ? AND image_id = ? AND name > ?
                     ORDER BY name LIMIT ?",
                )
                .bind(registry_id)
                .bind(image_id)
                .bind(last)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT name FROM tags WHERE registry_id = ? AND image_id = ?
                     ORDER BY name LIMIT ?",
                )
                .bind(registry_id)
                .bind(image_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn refresh_tag(&self, tag_id: i64, now: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE tags SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_tag(
        &self,
        registry_id: i64,
        image_id: i64,
        name: &str,
    ) -> MetadataResult<bool> {
        let result =
            sqlx::query("DELETE FROM tags WHERE registry_id = ? AND image_id = ? AND name = ?")
                .bind(registry_id)
                .bind(image_id)
                .bind(name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UploadRepo for SqliteStore {
    async fn create_upload(&self, session: &UploadSessionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, registry_id, image_id, state, "offset", created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id)
        .bind(session.registry_id)
        .bind(session.image_id)
        .bind(&session.state)
        .bind(session.offset)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
        let row =
            sqlx::query_as::<_, UploadSessionRow>("SELECT * FROM upload_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn advance_upload(
        &self,
        id: Uuid,
        from: i64,
        to: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        // Offset CAS: only one of two concurrent writers at the same offset
        // observes rows_affected = 1.
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET "offset" = ?, state = 'receiving', updated_at = ?
            WHERE id = ? AND "offset" = ? AND state IN ('open', 'receiving')
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_upload_state(
        &self,
        id: Uuid,
        from_states: &[&str],
        to: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        // from_states are internal constants, safe to inline.
        let states = from_states
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            r#"UPDATE upload_sessions SET state = ?, updated_at = ?
               WHERE id = ? AND state IN ({states})"#
        );
        let result = sqlx::query(&query)
            .bind(to)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_idle_uploads(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let rows = sqlx::query_as::<_, UploadSessionRow>(
            r#"
            SELECT * FROM upload_sessions
            WHERE state IN ('open', 'receiving') AND updated_at < ?
            ORDER BY updated_at LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_upload(&self, id: Uuid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UpstreamRepo for SqliteStore {
    async fn create_upstream_config(
        &self,
        config: &NewUpstreamConfig,
    ) -> MetadataResult<UpstreamConfigRow> {
        let now = OffsetDateTime::now_utc();
        let result = sqlx::query(
            r#"
            INSERT INTO upstream_configs (
                url, auth_mode, namespace, username, password, insecure_tls, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.url)
        .bind(config.auth_mode.as_str())
        .bind(&config.namespace)
        .bind(&config.username)
        .bind(&config.password)
        .bind(config.insecure_tls)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(UpstreamConfigRow {
            id: result.last_insert_rowid(),
            url: config.url.clone(),
            auth_mode: config.auth_mode.as_str().to_string(),
            namespace: config.namespace.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            insecure_tls: config.insecure_tls,
            created_at: now,
        })
    }

    async fn get_upstream_config(&self, id: i64) -> MetadataResult<Option<UpstreamConfigRow>> {
        let row =
            sqlx::query_as::<_, UpstreamConfigRow>("SELECT * FROM upstream_configs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }
}

#[async_trait]
impl StatsRepo for SqliteStore {
    async fn record_download(
        &self,
        registry_id: i64,
        image_id: i64,
        manifest_id: Option<i64>,
        blob_digest: Option<&str>,
        at: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO download_stats (registry_id, image_id, manifest_id, blob_digest, downloaded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(registry_id)
        .bind(image_id)
        .bind(manifest_id)
        .bind(blob_digest)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn download_stats(
        &self,
        registry_id: i64,
        image_id: i64,
    ) -> MetadataResult<DownloadStats> {
        let row = sqlx::query_as::<_, DownloadStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN manifest_id IS NOT NULL THEN 1 ELSE 0 END), 0) AS manifests,
                COALESCE(SUM(CASE WHEN blob_digest IS NOT NULL THEN 1 ELSE 0 END), 0) AS blobs
            FROM download_stats WHERE registry_id = ? AND image_id = ?
            "#,
        )
        .bind(registry_id)
        .bind(image_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
