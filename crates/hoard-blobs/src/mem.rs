//! In-memory blob store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::id::BlobId;
use crate::id::MAX_BLOB_SIZE;
use crate::id::hash;
use crate::store::BlobDelete;
use crate::store::BlobError;
use crate::store::BlobGet;
use crate::store::BlobList;
use crate::store::BlobPost;

/// An in-memory content-addressed store.
///
/// Clones share the same underlying storage. Backs unit tests, scratch trie
/// construction, and nodes that keep routing metadata purely in memory.
#[derive(Clone)]
pub struct MemBlobStore {
    blobs: Arc<RwLock<BTreeMap<BlobId, Bytes>>>,
    capacity: Option<usize>,
    max_blob_size: usize,
}

impl Default for MemBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBlobStore {
    pub fn new() -> Self {
        MemBlobStore {
            blobs: Arc::new(RwLock::new(BTreeMap::new())),
            capacity: None,
            max_blob_size: MAX_BLOB_SIZE,
        }
    }

    /// Caps the number of blobs held; `post` of a new blob past the cap fails
    /// with [`BlobError::Full`].
    pub fn with_capacity(capacity: usize) -> Self {
        MemBlobStore {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobGet for MemBlobStore {
    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        let blobs = self.blobs.read();
        blobs.get(id).cloned().ok_or(BlobError::NotFound { id: *id })
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        Ok(self.blobs.read().contains_key(id))
    }
}

#[async_trait]
impl BlobPost for MemBlobStore {
    async fn post(&self, data: &[u8]) -> Result<BlobId, BlobError> {
        if data.len() > self.max_blob_size {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.max_blob_size,
            });
        }
        let id = hash(data);
        let mut blobs = self.blobs.write();
        if blobs.contains_key(&id) {
            return Ok(id);
        }
        if let Some(cap) = self.capacity
            && blobs.len() >= cap
        {
            return Err(BlobError::Full);
        }
        blobs.insert(id, Bytes::copy_from_slice(data));
        Ok(id)
    }
}

#[async_trait]
impl BlobDelete for MemBlobStore {
    async fn delete(&self, id: &BlobId) -> Result<(), BlobError> {
        self.blobs.write().remove(id);
        Ok(())
    }
}

#[async_trait]
impl BlobList for MemBlobStore {
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        let blobs = self.blobs.read();
        let lo = BlobId::from_slice(prefix);
        let mut n = 0;
        for id in blobs.range(lo..).map(|(id, _)| id) {
            if !id.as_bytes().starts_with(prefix) {
                break;
            }
            if n >= ids.len() {
                return Err(BlobError::TooMany);
            }
            ids[n] = *id;
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_is_idempotent() {
        let store = MemBlobStore::new();
        let a = store.post(b"hello").await.unwrap();
        let b = store.post(b"hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemBlobStore::new();
        let err = store.get(&hash(b"nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let store = MemBlobStore::with_capacity(1);
        store.post(b"one").await.unwrap();
        // Re-posting an existing blob never counts against capacity.
        store.post(b"one").await.unwrap();
        let err = store.post(b"two").await.unwrap_err();
        assert!(matches!(err, BlobError::Full));
    }

    #[tokio::test]
    async fn list_overflow_is_too_many() {
        let store = MemBlobStore::new();
        for i in 0..8u8 {
            store.post(&[i]).await.unwrap();
        }
        let mut ids = [BlobId::ZERO; 4];
        let err = store.list(&[], &mut ids).await.unwrap_err();
        assert!(matches!(err, BlobError::TooMany));
        let mut ids = [BlobId::ZERO; 8];
        assert_eq!(store.list(&[], &mut ids).await.unwrap(), 8);
    }
}
