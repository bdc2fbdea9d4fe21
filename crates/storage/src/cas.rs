//! Content-addressed storage on top of an [`ObjectStore`].
//!
//! Objects live under `<root>/blobs/<algorithm>/<ab>/<cd>/<rest-of-hex>`,
//! where `<root>` is the tenant root identifier: blobs are deduplicated
//! per tenant, never across tenants. In-flight upload sessions stage under
//! `<root>/_uploads/<session>` until committed.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use wharf_core::digest::{Digest, DigestAlgorithm, DigestHasher};

/// Content-addressed store scoped by tenant root.
#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn ObjectStore>,
}

impl ContentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The backing object store.
    pub fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// CAS key for a digest: `<root>/blobs/sha256/ab/cd/<rest>`.
    pub fn blob_key(root: &str, digest: &Digest) -> String {
        let hex = digest.hex();
        format!(
            "{root}/blobs/{}/{}/{}/{}",
            digest.algorithm(),
            &hex[0..2],
            &hex[2..4],
            &hex[4..]
        )
    }

    /// Staging key for an upload session: `<root>/_uploads/<session>`.
    pub fn staging_key(root: &str, session: &Uuid) -> String {
        format!("{root}/_uploads/{session}")
    }

    /// Whether a blob exists in the tenant's CAS.
    pub async fn exists(&self, root: &str, digest: &Digest) -> StorageResult<bool> {
        self.store.exists(&Self::blob_key(root, digest)).await
    }

    /// Size and metadata of a stored blob.
    pub async fn stat(&self, root: &str, digest: &Digest) -> StorageResult<ObjectMeta> {
        self.store.head(&Self::blob_key(root, digest)).await
    }

    /// Stream a stored blob.
    pub async fn open(&self, root: &str, digest: &Digest) -> StorageResult<ByteStream> {
        self.store.get_stream(&Self::blob_key(root, digest)).await
    }

    /// Read a stored blob fully into memory. Manifest-sized objects only.
    pub async fn get(&self, root: &str, digest: &Digest) -> StorageResult<Bytes> {
        self.store.get(&Self::blob_key(root, digest)).await
    }

    /// Store a complete in-memory object, returning its digest.
    ///
    /// Concurrent puts of the same bytes are idempotent: the second caller
    /// observes the first's object.
    #[instrument(skip(self, data), fields(root = %root, size = data.len()))]
    pub async fn put(&self, root: &str, data: Bytes) -> StorageResult<Digest> {
        let digest = Digest::sha256(&data);
        self.store
            .put_if_not_exists(&Self::blob_key(root, &digest), data)
            .await?;
        Ok(digest)
    }

    /// Delete a blob object from the tenant's CAS.
    pub async fn delete(&self, root: &str, digest: &Digest) -> StorageResult<()> {
        self.store.delete(&Self::blob_key(root, digest)).await
    }

    /// Append bytes to a session's staging object; returns the new length.
    /// Callers serialize appends per session.
    pub async fn append_staged(
        &self,
        root: &str,
        session: &Uuid,
        data: Bytes,
    ) -> StorageResult<u64> {
        self.store
            .append(&Self::staging_key(root, session), data)
            .await
    }

    /// Current length of a session's staging object; 0 when nothing has
    /// been appended yet.
    pub async fn staged_size(&self, root: &str, session: &Uuid) -> StorageResult<u64> {
        match self.store.head(&Self::staging_key(root, session)).await {
            Ok(meta) => Ok(meta.size),
            Err(StorageError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Finalize a session: stream the staged bytes through a hasher, verify
    /// them against `expected`, move the object into the CAS, and drop the
    /// staging object.
    ///
    /// Committing the same digest twice is idempotent; the second staging
    /// object is simply discarded.
    #[instrument(skip(self), fields(root = %root, session = %session))]
    pub async fn commit_staged(
        &self,
        root: &str,
        session: &Uuid,
        expected: &Digest,
    ) -> StorageResult<u64> {
        let staging_key = Self::staging_key(root, session);

        let mut hasher = Digest::hasher(expected.algorithm());
        let mut size: u64 = 0;
        {
            let mut stream = match self.store.get_stream(&staging_key).await {
                Ok(stream) => stream,
                // No PATCH ever arrived; an empty stream still hashes.
                Err(StorageError::NotFound(_)) => Box::pin(futures::stream::empty()),
                Err(e) => return Err(e),
            };
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                size += chunk.len() as u64;
            }
        }

        let actual = hasher.finalize();
        if actual != *expected {
            return Err(StorageError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let blob_key = Self::blob_key(root, expected);
        if !self.store.exists(&blob_key).await? {
            if size == 0 {
                self.store.put(&blob_key, Bytes::new()).await?;
            } else {
                self.store.copy(&staging_key, &blob_key).await?;
            }
        }
        let _ = self.store.delete(&staging_key).await;
        Ok(size)
    }

    /// Discard a session's staging object, if any.
    pub async fn delete_staged(&self, root: &str, session: &Uuid) -> StorageResult<()> {
        match self.store.delete(&Self::staging_key(root, session)).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Open a hashing staging writer for a streamed fetch (upstream proxy
    /// tee). The writer stages under a fresh synthetic session id.
    pub async fn stage(&self, root: &str) -> StorageResult<StagingWriter> {
        let session = Uuid::new_v4();
        let upload = self
            .store
            .put_stream(&Self::staging_key(root, &session))
            .await?;
        Ok(StagingWriter {
            cas: self.clone(),
            root: root.to_string(),
            session,
            upload: Some(upload),
            hasher: Some(Digest::hasher(DigestAlgorithm::Sha256)),
            size: 0,
        })
    }
}

/// Hashing writer that stages bytes and commits them under their digest.
pub struct StagingWriter {
    cas: ContentStore,
    root: String,
    session: Uuid,
    upload: Option<Box<dyn StreamingUpload>>,
    hasher: Option<DigestHasher>,
    size: u64,
}

impl StagingWriter {
    /// Write a chunk, updating the running digest.
    pub async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let upload = self
            .upload
            .as_mut()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already finished")))?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&data);
        }
        self.size += data.len() as u64;
        upload.write(data).await
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish staging and move the object into the CAS. When `expected` is
    /// given the computed digest must match it.
    pub async fn commit(mut self, expected: Option<&Digest>) -> StorageResult<(Digest, u64)> {
        let upload = self
            .upload
            .take()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already finished")))?;
        upload.finish().await?;

        let actual = self.hasher.take().expect("hasher present").finalize();
        if let Some(expected) = expected
            && actual != *expected
        {
            let _ = self.cas.delete_staged(&self.root, &self.session).await;
            return Err(StorageError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let staging_key = ContentStore::staging_key(&self.root, &self.session);
        let blob_key = ContentStore::blob_key(&self.root, &actual);
        if !self.cas.store.exists(&blob_key).await? {
            self.cas.store.copy(&staging_key, &blob_key).await?;
        }
        let _ = self.cas.store.delete(&staging_key).await;
        Ok((actual, self.size))
    }

    /// Abort and discard staged bytes.
    pub async fn abort(mut self) -> StorageResult<()> {
        if let Some(upload) = self.upload.take() {
            let _ = upload.abort().await;
        }
        self.cas.delete_staged(&self.root, &self.session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::filesystem::FilesystemBackend;

    async fn cas() -> (tempfile::TempDir, ContentStore) {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        (temp, ContentStore::new(Arc::new(backend)))
    }

    #[tokio::test]
    async fn blob_key_shards_by_hex_prefix() {
        let digest = Digest::sha256(b"hello");
        let key = ContentStore::blob_key("acme", &digest);
        let hex = digest.hex();
        assert_eq!(
            key,
            format!(
                "acme/blobs/sha256/{}/{}/{}",
                &hex[0..2],
                &hex[2..4],
                &hex[4..]
            )
        );
    }

    #[tokio::test]
    async fn put_then_open_roundtrips() {
        let (_temp, cas) = cas().await;
        let digest = cas.put("acme", Bytes::from_static(b"layer-bytes")).await.unwrap();
        assert_eq!(digest, Digest::sha256(b"layer-bytes"));

        let mut stream = cas.open("acme", &digest).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"layer-bytes");
    }

    #[tokio::test]
    async fn tenants_do_not_share_objects() {
        let (_temp, cas) = cas().await;
        let digest = cas.put("acme", Bytes::from_static(b"private")).await.unwrap();
        assert!(cas.exists("acme", &digest).await.unwrap());
        assert!(!cas.exists("globex", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn staged_commit_verifies_digest() {
        let (_temp, cas) = cas().await;
        let session = Uuid::new_v4();
        cas.append_staged("acme", &session, Bytes::from_static(b"part-a"))
            .await
            .unwrap();
        cas.append_staged("acme", &session, Bytes::from_static(b"part-b"))
            .await
            .unwrap();
        assert_eq!(cas.staged_size("acme", &session).await.unwrap(), 12);

        let expected = Digest::sha256(b"part-apart-b");
        let size = cas.commit_staged("acme", &session, &expected).await.unwrap();
        assert_eq!(size, 12);
        assert!(cas.exists("acme", &expected).await.unwrap());
        // Staging object is gone.
        assert_eq!(cas.staged_size("acme", &session).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn staged_commit_rejects_wrong_digest() {
        let (_temp, cas) = cas().await;
        let session = Uuid::new_v4();
        cas.append_staged("acme", &session, Bytes::from_static(b"data"))
            .await
            .unwrap();

        let wrong = Digest::sha256(b"other");
        match cas.commit_staged("acme", &session, &wrong).await {
            Err(StorageError::DigestMismatch { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!cas.exists("acme", &wrong).await.unwrap());
    }

    #[tokio::test]
    async fn empty_commit_stores_empty_blob() {
        let (_temp, cas) = cas().await;
        let session = Uuid::new_v4();
        let expected = Digest::sha256(b"");
        let size = cas.commit_staged("acme", &session, &expected).await.unwrap();
        assert_eq!(size, 0);
        assert!(cas.exists("acme", &expected).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_commit_is_idempotent() {
        let (_temp, cas) = cas().await;
        let expected = Digest::sha256(b"same-bytes");

        for _ in 0..2 {
            let session = Uuid::new_v4();
            cas.append_staged("acme", &session, Bytes::from_static(b"same-bytes"))
                .await
                .unwrap();
            cas.commit_staged("acme", &session, &expected).await.unwrap();
        }
        assert_eq!(cas.get("acme", &expected).await.unwrap().as_ref(), b"same-bytes");
    }

    #[tokio::test]
    async fn staging_writer_commits_under_digest() {
        let (_temp, cas) = cas().await;
        let mut writer = cas.stage("acme").await.unwrap();
        writer.write(Bytes::from_static(b"remote-")).await.unwrap();
        writer.write(Bytes::from_static(b"blob")).await.unwrap();
        let (digest, size) = writer.commit(None).await.unwrap();
        assert_eq!(digest, Digest::sha256(b"remote-blob"));
        assert_eq!(size, 11);
        assert!(cas.exists("acme", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn staging_writer_rejects_mismatch() {
        let (_temp, cas) = cas().await;
        let mut writer = cas.stage("acme").await.unwrap();
        writer.write(Bytes::from_static(b"actual")).await.unwrap();
        let wrong = Digest::sha256(b"declared");
        assert!(writer.commit(Some(&wrong)).await.is_err());
        assert!(!cas.exists("acme", &wrong).await.unwrap());
    }

    #[tokio::test]
    async fn staging_writer_abort_discards() {
        let (_temp, cas) = cas().await;
        let mut writer = cas.stage("acme").await.unwrap();
        writer.write(Bytes::from_static(b"junk")).await.unwrap();
        writer.abort().await.unwrap();
        let digest = Digest::sha256(b"junk");
        assert!(!cas.exists("acme", &digest).await.unwrap());
    }
}
