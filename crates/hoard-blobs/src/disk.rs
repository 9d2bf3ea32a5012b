//! Persistent blob store over redb.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::ReadableTable;
use redb::TableDefinition;
use tracing::debug;

use crate::id::BlobId;
use crate::id::MAX_BLOB_SIZE;
use crate::id::hash;
use crate::store::BlobDelete;
use crate::store::BlobError;
use crate::store::BlobGet;
use crate::store::BlobList;
use crate::store::BlobPost;

/// Blob store persisting to a shared redb database.
///
/// Keys are the raw 32-byte IDs; values the blob bytes. The database handle
/// is shared with the pin-set store and the promise tables, so a node's whole
/// durable state lives in one file. Distinct stores over one database use
/// distinct table names.
#[derive(Clone)]
pub struct RedbBlobStore {
    db: Arc<redb::Database>,
    table: String,
    max_blob_size: usize,
}

impl RedbBlobStore {
    pub fn new(db: Arc<redb::Database>) -> Result<Self, BlobError> {
        Self::with_table(db, "blobs")
    }

    pub fn with_table(db: Arc<redb::Database>, table: &str) -> Result<Self, BlobError> {
        let store = RedbBlobStore {
            db,
            table: table.to_string(),
            max_blob_size: MAX_BLOB_SIZE,
        };
        // Create the table up front so reads on a fresh database don't fail.
        let tx = store.db.begin_write().map_err(BlobError::storage)?;
        tx.open_table(store.table_def()).map_err(BlobError::storage)?;
        tx.commit().map_err(BlobError::storage)?;
        Ok(store)
    }

    fn table_def(&self) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
        TableDefinition::new(&self.table)
    }
}

#[async_trait]
impl BlobGet for RedbBlobStore {
    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        let tx = self.db.begin_read().map_err(BlobError::storage)?;
        let table = tx.open_table(self.table_def()).map_err(BlobError::storage)?;
        match table.get(id.as_bytes().as_slice()).map_err(BlobError::storage)? {
            Some(value) => Ok(Bytes::copy_from_slice(value.value())),
            None => Err(BlobError::NotFound { id: *id }),
        }
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        let tx = self.db.begin_read().map_err(BlobError::storage)?;
        let table = tx.open_table(self.table_def()).map_err(BlobError::storage)?;
        Ok(table.get(id.as_bytes().as_slice()).map_err(BlobError::storage)?.is_some())
    }
}

#[async_trait]
impl BlobPost for RedbBlobStore {
    async fn post(&self, data: &[u8]) -> Result<BlobId, BlobError> {
        if data.len() > self.max_blob_size {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.max_blob_size,
            });
        }
        let id = hash(data);
        let tx = self.db.begin_write().map_err(BlobError::storage)?;
        {
            let mut table = tx.open_table(self.table_def()).map_err(BlobError::storage)?;
            if table.get(id.as_bytes().as_slice()).map_err(BlobError::storage)?.is_none() {
                table
                    .insert(id.as_bytes().as_slice(), data)
                    .map_err(BlobError::storage)?;
            }
        }
        tx.commit().map_err(BlobError::storage)?;
        debug!(id = %id.fmt_short(), size = data.len(), "blob stored");
        Ok(id)
    }
}

#[async_trait]
impl BlobDelete for RedbBlobStore {
    async fn delete(&self, id: &BlobId) -> Result<(), BlobError> {
        let tx = self.db.begin_write().map_err(BlobError::storage)?;
        {
            let mut table = tx.open_table(self.table_def()).map_err(BlobError::storage)?;
            table.remove(id.as_bytes().as_slice()).map_err(BlobError::storage)?;
        }
        tx.commit().map_err(BlobError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl BlobList for RedbBlobStore {
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        let tx = self.db.begin_read().map_err(BlobError::storage)?;
        let table = tx.open_table(self.table_def()).map_err(BlobError::storage)?;
        let mut n = 0;
        for item in table.range(prefix..).map_err(BlobError::storage)? {
            let (key, _) = item.map_err(BlobError::storage)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            if n >= ids.len() {
                return Err(BlobError::TooMany);
            }
            ids[n] = BlobId::from_slice(key.value());
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use redb::backends::InMemoryBackend;

    use super::*;

    fn test_store() -> RedbBlobStore {
        let db = redb::Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap();
        RedbBlobStore::new(Arc::new(db)).unwrap()
    }

    #[tokio::test]
    async fn round_trip() {
        let store = test_store();
        let id = store.post(b"persistent").await.unwrap();
        assert_eq!(id, hash(b"persistent"));
        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().as_ref(), b"persistent");

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn list_under_prefix() {
        let store = test_store();
        let mut stored = Vec::new();
        for i in 0..16u8 {
            stored.push(store.post(&[i; 3]).await.unwrap());
        }
        stored.sort();

        let mut ids = [BlobId::ZERO; 32];
        let n = store.list(&[], &mut ids).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(&ids[..n], &stored[..]);

        let first = stored[0];
        let n = store.list(&first.as_bytes()[..1], &mut ids).await.unwrap();
        assert!(n >= 1);
        assert!(ids[..n].contains(&first));
    }

    #[tokio::test]
    async fn oversize_blob_rejected() {
        let store = test_store();
        let big = vec![0u8; MAX_BLOB_SIZE + 1];
        let err = store.post(&big).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { .. }));
    }
}
