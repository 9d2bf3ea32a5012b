//! Blob sets backed by tries.

use std::sync::Arc;

use async_trait::async_trait;
use hoard_blobs::BlobError;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobList;
use hoard_blobs::BlobPost;
use hoard_blobs::BlobSet;
use hoard_tries::Node;
use hoard_tries::TrieError;

use crate::error::NetError;

/// A set of blob IDs represented as a trie in a backing store: keys are the
/// raw IDs, values empty. Because the representation is content-addressed,
/// two sets with the same members share a root.
#[derive(Clone)]
pub struct TrieSet<S> {
    store: S,
    root: BlobId,
}

impl<S> TrieSet<S>
where
    S: BlobGet + BlobPost + Send + Sync,
{
    /// An empty set.
    pub async fn new(store: S) -> Result<Self, NetError> {
        let root = hoard_tries::post_node(&store, &Node::new()).await?;
        Ok(TrieSet { store, root })
    }

    /// A view over an existing root.
    pub fn with_root(store: S, root: BlobId) -> Self {
        TrieSet { store, root }
    }

    /// Adds `id` to the set.
    pub async fn add(&mut self, id: &BlobId) -> Result<(), NetError> {
        self.root = hoard_tries::put(&self.store, &self.root, id.as_bytes(), &[]).await?;
        Ok(())
    }

    /// The root summarising the current members.
    pub fn root(&self) -> BlobId {
        self.root
    }
}

#[async_trait]
impl<S> BlobList for TrieSet<S>
where
    S: BlobGet + BlobPost + Send + Sync,
{
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        let mut n = 0;
        let result = hoard_tries::for_each(&self.store, &self.root, prefix, &mut |key, _| {
            if n >= ids.len() {
                return Err(TrieError::Blob { source: BlobError::TooMany });
            }
            ids[n] = BlobId::from_slice(key);
            n += 1;
            Ok(())
        })
        .await;
        match result {
            Ok(()) => Ok(n),
            Err(TrieError::Blob { source: BlobError::TooMany }) => Err(BlobError::TooMany),
            Err(TrieError::Blob { source }) => Err(source),
            Err(other) => Err(BlobError::storage(other)),
        }
    }
}

#[async_trait]
impl<S> BlobSet for TrieSet<S>
where
    S: BlobGet + BlobPost + Send + Sync,
{
    async fn contains(&self, id: &BlobId) -> Result<bool, BlobError> {
        match hoard_tries::get(&self.store, &self.root, id.as_bytes()).await {
            Ok(found) => Ok(found.is_some()),
            Err(TrieError::Blob { source }) => Err(source),
            Err(other) => Err(BlobError::storage(other)),
        }
    }
}

/// The union of several sets.
pub struct Union(pub Vec<Arc<dyn BlobSet>>);

#[async_trait]
impl BlobList for Union {
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        let mut total = 0;
        for set in &self.0 {
            if total >= ids.len() {
                return Err(BlobError::TooMany);
            }
            total += set.list(prefix, &mut ids[total..]).await?;
        }
        Ok(total)
    }
}

#[async_trait]
impl BlobSet for Union {
    async fn contains(&self, id: &BlobId) -> Result<bool, BlobError> {
        for set in &self.0 {
            if set.contains(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
