//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::UploadSessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for resumable upload sessions.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_upload(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by id.
    async fn get_upload(&self, id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Advance the session offset from `from` to `to`, marking the session
    /// `receiving`. Compare-and-swap: returns false when the persisted
    /// offset is no longer `from` (a concurrent writer won) or the session
    /// is not active.
    async fn advance_upload(
        &self,
        id: Uuid,
        from: i64,
        to: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Transition the session to a new state. Returns false when the
    /// current state does not admit the transition.
    async fn update_upload_state(
        &self,
        id: Uuid,
        from_states: &[&str],
        to: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Sessions idle since before `cutoff`, still in an active state.
    async fn get_idle_uploads(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Delete a session row.
    async fn delete_upload(&self, id: Uuid) -> MetadataResult<()>;
}
