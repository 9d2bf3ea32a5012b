//! The pin-set store.

use std::sync::Arc;

use async_trait::async_trait;
use hoard_blobs::BlobError;
use hoard_blobs::BlobId;
use hoard_blobs::BlobList;
use hoard_blobs::BlobSet;
use hoard_blobs::MemBlobStore;
use hoard_blobs::util::prefix_end;
use redb::ReadableTable;
use redb::TableDefinition;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;

use crate::varint;

const PINSETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pinsets");
const NAMES: TableDefinition<&str, u64> = TableDefinition::new("pinsets-names");
const REFCOUNTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pinrefcount");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SEQ_KEY: &str = "pinsets.seq";

/// Identifier of a pin set, allocated from a monotonic sequence.
pub type PinSetId = u64;

/// A pin set summary: the trie root over its members and their count.
///
/// `root` is computed from the live members on every call, not cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSet {
    pub id: PinSetId,
    pub name: String,
    pub root: BlobId,
    pub count: u64,
}

/// Errors from pin-set operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PinSetError {
    /// No pin set with the given ID or name.
    #[snafu(display("pinset not found"))]
    NotFound,

    /// A pin set with this name already exists.
    #[snafu(display("pinset exists: {name}"))]
    Exists { name: String },

    /// Refcount decrement on a blob with no refcount entry.
    #[snafu(display("can't decrement null refcount for {id}"))]
    DecrementNull { id: BlobId },

    /// Listing overflowed the caller's buffer.
    #[snafu(display("prefix enumerates more ids than the buffer holds"))]
    TooMany,

    /// A stored refcount failed to parse.
    #[snafu(display("corrupt refcount entry for {id}"))]
    CorruptRefcount { id: BlobId },

    /// Failed to begin a transaction.
    #[snafu(display("failed to begin transaction: {source}"))]
    BeginTx { source: redb::TransactionError },

    /// Failed to open a table.
    #[snafu(display("failed to open table: {source}"))]
    OpenTable { source: redb::TableError },

    /// Failed to read or write a table row.
    #[snafu(display("storage failure: {source}"))]
    Storage { source: redb::StorageError },

    /// Failed to commit a transaction.
    #[snafu(display("failed to commit transaction: {source}"))]
    Commit { source: redb::CommitError },

    /// Failed to build the member trie.
    #[snafu(display("failed to build pin-set root: {source}"))]
    Root { source: hoard_tries::TrieError },
}

fn id_key(id: PinSetId) -> [u8; 8] {
    id.to_be_bytes()
}

fn member_table(id: PinSetId) -> String {
    format!("pinsets/{id:016x}")
}

/// Store of pin sets and the global refcount map, backed by a shared redb
/// database.
pub struct PinSetStore {
    db: Arc<redb::Database>,
}

impl PinSetStore {
    pub fn new(db: Arc<redb::Database>) -> Result<Self, PinSetError> {
        let tx = db.begin_write().context(BeginTxSnafu)?;
        tx.open_table(PINSETS).context(OpenTableSnafu)?;
        tx.open_table(NAMES).context(OpenTableSnafu)?;
        tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
        tx.open_table(META).context(OpenTableSnafu)?;
        tx.commit().context(CommitSnafu)?;
        Ok(PinSetStore { db })
    }

    /// Creates a pin set under a unique name and returns its fresh ID.
    pub fn create(&self, name: &str) -> Result<PinSetId, PinSetError> {
        let tx = self.db.begin_write().context(BeginTxSnafu)?;
        let id = {
            let mut names = tx.open_table(NAMES).context(OpenTableSnafu)?;
            if names.get(name).context(StorageSnafu)?.is_some() {
                return Err(PinSetError::Exists { name: name.to_string() });
            }

            let mut meta = tx.open_table(META).context(OpenTableSnafu)?;
            let seq = meta.get(SEQ_KEY).context(StorageSnafu)?.map(|v| v.value()).unwrap_or(0) + 1;
            meta.insert(SEQ_KEY, seq).context(StorageSnafu)?;

            let mut pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
            pinsets
                .insert(id_key(seq).as_slice(), name.as_bytes())
                .context(StorageSnafu)?;
            names.insert(name, seq).context(StorageSnafu)?;

            let table_name = member_table(seq);
            let members: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            tx.open_table(members).context(OpenTableSnafu)?;
            seq
        };
        tx.commit().context(CommitSnafu)?;
        debug!(name, id, "pinset created");
        Ok(id)
    }

    /// Resolves a name to its pin-set ID.
    pub fn resolve(&self, name: &str) -> Result<Option<PinSetId>, PinSetError> {
        let tx = self.db.begin_read().context(BeginTxSnafu)?;
        let names = tx.open_table(NAMES).context(OpenTableSnafu)?;
        Ok(names.get(name).context(StorageSnafu)?.map(|v| v.value()))
    }

    /// Ensures a pin set does not exist, decrementing refcounts for every
    /// member first. A missing ID is a no-op.
    pub fn delete(&self, id: PinSetId) -> Result<(), PinSetError> {
        let tx = self.db.begin_write().context(BeginTxSnafu)?;
        {
            let mut pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
            let name = match pinsets.get(id_key(id).as_slice()).context(StorageSnafu)? {
                Some(v) => String::from_utf8_lossy(v.value()).into_owned(),
                None => return Ok(()),
            };

            let table_name = member_table(id);
            let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let mut refcounts = tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
            {
                let members = tx.open_table(members_def).context(OpenTableSnafu)?;
                for item in members.iter().context(StorageSnafu)? {
                    let (key, _) = item.context(StorageSnafu)?;
                    pin_decr(&mut refcounts, &BlobId::from_slice(key.value()))?;
                }
            }
            tx.delete_table(members_def).context(OpenTableSnafu)?;

            pinsets.remove(id_key(id).as_slice()).context(StorageSnafu)?;
            let mut names = tx.open_table(NAMES).context(OpenTableSnafu)?;
            names.remove(name.as_str()).context(StorageSnafu)?;
        }
        tx.commit().context(CommitSnafu)?;
        debug!(id, "pinset deleted");
        Ok(())
    }

    /// Ensures the pin set contains `blob`. Idempotent: pinning an existing
    /// member does not touch the refcount.
    pub fn pin(&self, id: PinSetId, blob: &BlobId) -> Result<(), PinSetError> {
        let tx = self.db.begin_write().context(BeginTxSnafu)?;
        {
            let pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
            if pinsets.get(id_key(id).as_slice()).context(StorageSnafu)?.is_none() {
                return Err(PinSetError::NotFound);
            }

            let table_name = member_table(id);
            let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let mut members = tx.open_table(members_def).context(OpenTableSnafu)?;
            let already = members.get(blob.as_bytes().as_slice()).context(StorageSnafu)?.is_some();
            if !already {
                members
                    .insert(blob.as_bytes().as_slice(), b"".as_slice())
                    .context(StorageSnafu)?;
                let mut refcounts = tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
                pin_incr(&mut refcounts, blob)?;
            }
        }
        tx.commit().context(CommitSnafu)?;
        Ok(())
    }

    /// Ensures the pin set does not contain `blob`. Only an actual removal
    /// decrements the refcount.
    pub fn unpin(&self, id: PinSetId, blob: &BlobId) -> Result<(), PinSetError> {
        let tx = self.db.begin_write().context(BeginTxSnafu)?;
        {
            let pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
            if pinsets.get(id_key(id).as_slice()).context(StorageSnafu)?.is_none() {
                return Err(PinSetError::NotFound);
            }

            let table_name = member_table(id);
            let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let mut members = tx.open_table(members_def).context(OpenTableSnafu)?;
            let removed = members.remove(blob.as_bytes().as_slice()).context(StorageSnafu)?.is_some();
            if removed {
                let mut refcounts = tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
                pin_decr(&mut refcounts, blob)?;
            }
        }
        tx.commit().context(CommitSnafu)?;
        Ok(())
    }

    /// True iff the pin set contains `blob`.
    pub fn exists(&self, id: PinSetId, blob: &BlobId) -> Result<bool, PinSetError> {
        let tx = self.db.begin_read().context(BeginTxSnafu)?;
        let pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
        if pinsets.get(id_key(id).as_slice()).context(StorageSnafu)?.is_none() {
            return Err(PinSetError::NotFound);
        }
        let table_name = member_table(id);
        let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
        let members = tx.open_table(members_def).context(OpenTableSnafu)?;
        Ok(members.get(blob.as_bytes().as_slice()).context(StorageSnafu)?.is_some())
    }

    /// Fills `ids` with the members under `prefix`; `TooMany` on overflow.
    pub fn list(&self, id: PinSetId, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, PinSetError> {
        let tx = self.db.begin_read().context(BeginTxSnafu)?;
        let pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
        if pinsets.get(id_key(id).as_slice()).context(StorageSnafu)?.is_none() {
            return Err(PinSetError::NotFound);
        }
        let table_name = member_table(id);
        let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
        let members = tx.open_table(members_def).context(OpenTableSnafu)?;
        scan_ids(&members, prefix, ids)
    }

    /// Summarises the pin set: its member count and the root of the trie
    /// enumerating exactly its members.
    pub async fn get(&self, id: PinSetId) -> Result<PinSet, PinSetError> {
        let (name, members) = {
            let tx = self.db.begin_read().context(BeginTxSnafu)?;
            let pinsets = tx.open_table(PINSETS).context(OpenTableSnafu)?;
            let name = match pinsets.get(id_key(id).as_slice()).context(StorageSnafu)? {
                Some(v) => String::from_utf8_lossy(v.value()).into_owned(),
                None => return Err(PinSetError::NotFound),
            };
            let table_name = member_table(id);
            let members_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let table = tx.open_table(members_def).context(OpenTableSnafu)?;
            let mut members = Vec::new();
            for item in table.iter().context(StorageSnafu)? {
                let (key, _) = item.context(StorageSnafu)?;
                members.push(BlobId::from_slice(key.value()));
            }
            (name, members)
        };

        let scratch = MemBlobStore::new();
        let mut root = hoard_tries::post_node(&scratch, &hoard_tries::Node::new())
            .await
            .context(RootSnafu)?;
        for member in &members {
            root = hoard_tries::put(&scratch, &root, member.as_bytes(), &[])
                .await
                .context(RootSnafu)?;
        }

        Ok(PinSet {
            id,
            name,
            root,
            count: members.len() as u64,
        })
    }

    /// The number of distinct pin-set memberships referring to `blob`.
    pub fn refcount(&self, blob: &BlobId) -> Result<u64, PinSetError> {
        let tx = self.db.begin_read().context(BeginTxSnafu)?;
        let refcounts = tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
        match refcounts.get(blob.as_bytes().as_slice()).context(StorageSnafu)? {
            Some(v) => varint::decode(v.value()).ok_or(PinSetError::CorruptRefcount { id: *blob }),
            None => Ok(0),
        }
    }

    /// Fills `ids` with every blob whose refcount is above zero, under
    /// `prefix`.
    pub fn list_pinned(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, PinSetError> {
        let tx = self.db.begin_read().context(BeginTxSnafu)?;
        let refcounts = tx.open_table(REFCOUNTS).context(OpenTableSnafu)?;
        scan_ids(&refcounts, prefix, ids)
    }
}

fn scan_ids<T>(table: &T, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, PinSetError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let range = match prefix_end(prefix) {
        Some(end) => table.range(prefix..end.as_slice()),
        None => table.range(prefix..),
    }
    .context(StorageSnafu)?;
    let mut n = 0;
    for item in range {
        let (key, _) = item.context(StorageSnafu)?;
        if n >= ids.len() {
            return Err(PinSetError::TooMany);
        }
        ids[n] = BlobId::from_slice(key.value());
        n += 1;
    }
    Ok(n)
}

fn pin_incr(
    refcounts: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    id: &BlobId,
) -> Result<(), PinSetError> {
    let current = match refcounts.get(id.as_bytes().as_slice()).context(StorageSnafu)? {
        Some(v) => varint::decode(v.value()).ok_or(PinSetError::CorruptRefcount { id: *id })?,
        None => 0,
    };
    let encoded = varint::encode(current + 1);
    refcounts
        .insert(id.as_bytes().as_slice(), encoded.as_slice())
        .context(StorageSnafu)?;
    Ok(())
}

fn pin_decr(
    refcounts: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    id: &BlobId,
) -> Result<(), PinSetError> {
    let current = match refcounts.get(id.as_bytes().as_slice()).context(StorageSnafu)? {
        Some(v) => varint::decode(v.value()).ok_or(PinSetError::CorruptRefcount { id: *id })?,
        None => return Err(PinSetError::DecrementNull { id: *id }),
    };
    if current <= 1 {
        refcounts.remove(id.as_bytes().as_slice()).context(StorageSnafu)?;
    } else {
        let encoded = varint::encode(current - 1);
        refcounts
            .insert(id.as_bytes().as_slice(), encoded.as_slice())
            .context(StorageSnafu)?;
    }
    Ok(())
}

/// The set of locally pinned blobs (refcount above zero), viewed through the
/// blob-set capability. This is what the node wants persisted and what it
/// publishes to the routing overlay.
#[derive(Clone)]
pub struct PinnedSet {
    store: Arc<PinSetStore>,
}

impl PinnedSet {
    pub fn new(store: Arc<PinSetStore>) -> Self {
        PinnedSet { store }
    }
}

#[async_trait]
impl BlobList for PinnedSet {
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        self.store.list_pinned(prefix, ids).map_err(|e| match e {
            PinSetError::TooMany => BlobError::TooMany,
            other => BlobError::storage(other),
        })
    }
}

#[async_trait]
impl BlobSet for PinnedSet {
    async fn contains(&self, id: &BlobId) -> Result<bool, BlobError> {
        let count = self.store.refcount(id).map_err(BlobError::storage)?;
        Ok(count > 0)
    }
}
