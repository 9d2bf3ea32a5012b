//! Trie nodes and their content encoding.

use hoard_blobs::BlobError;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobPost;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// A leaf holding more entries than this is split into a parent on insert.
pub const SPLIT_THRESHOLD: usize = 256;

/// Errors from trie operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TrieError {
    /// A key or listing prefix is not comparable to the node's prefix.
    #[snafu(display("prefix not comparable to trie prefix"))]
    BadPrefix,

    /// A node blob failed to encode or decode.
    #[snafu(display("node codec failure: {message}"))]
    Codec { message: String },

    /// Failure in the backing blob store.
    #[snafu(transparent)]
    Blob { source: BlobError },
}

/// A `(key, value)` pair stored in a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// One trie node.
///
/// Every key in the subtree lies under `prefix`. A *parent* carries 256 child
/// slots, one per next byte, each slot empty or a reference to a child node
/// whose prefix extends this one by exactly that byte; a parent additionally
/// holds the entries whose key equals its prefix exactly (they have no next
/// byte to descend on). A *leaf* has no child slots and holds its entries
/// sorted by key.
///
/// The encoding is deterministic: fixed field order, entries sorted, each of
/// the 256 slots encoded (empty slots as a zero tag), so equal content yields
/// equal blob IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    prefix: Vec<u8>,
    children: Vec<Option<BlobId>>,
    entries: Vec<Entry>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// The empty trie: a leaf with an empty prefix and no entries.
    pub fn new() -> Self {
        Node::leaf(Vec::new(), Vec::new())
    }

    pub(crate) fn leaf(prefix: Vec<u8>, entries: Vec<Entry>) -> Self {
        Node {
            prefix,
            children: Vec::new(),
            entries,
        }
    }

    pub(crate) fn parent(prefix: Vec<u8>, entries: Vec<Entry>) -> Self {
        Node {
            prefix,
            children: vec![None; 256],
            entries,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }

    /// The reference in child slot `b`, if any. Empty on leaves.
    pub fn child(&self, b: u8) -> Option<BlobId> {
        self.children.get(b as usize).copied().flatten()
    }

    pub(crate) fn set_child(&mut self, b: u8, id: BlobId) {
        self.children[b as usize] = Some(id);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.children.iter().all(Option::is_none)
    }

    /// Inserts or replaces an entry, keeping the list sorted.
    ///
    /// With `overwrite` false an existing key keeps its value. Returns true
    /// when the entry list changed.
    pub(crate) fn upsert(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> bool {
        match self.entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(i) => {
                if !overwrite || self.entries[i].value == value {
                    return false;
                }
                self.entries[i].value = value.to_vec();
                true
            }
            Err(i) => {
                self.entries.insert(
                    i,
                    Entry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    },
                );
                true
            }
        }
    }

    pub(crate) fn find(&self, key: &[u8]) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.key.as_slice().cmp(key))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Deterministic content encoding of this node.
    pub fn encode(&self) -> Result<Vec<u8>, TrieError> {
        postcard::to_allocvec(self).map_err(|e| TrieError::Codec { message: e.to_string() })
    }

    pub fn decode(data: &[u8]) -> Result<Self, TrieError> {
        let node: Node = postcard::from_bytes(data).map_err(|e| TrieError::Codec { message: e.to_string() })?;
        if !node.children.is_empty() && node.children.len() != 256 {
            return Err(TrieError::Codec {
                message: format!("parent with {} child slots", node.children.len()),
            });
        }
        Ok(node)
    }
}

/// Writes a node's encoding to `store` and returns its reference.
pub async fn post_node<S>(store: &S, node: &Node) -> Result<BlobId, TrieError>
where
    S: BlobPost + ?Sized,
{
    let data = node.encode()?;
    Ok(store.post(&data).await?)
}

/// Loads the node referenced by `id`.
pub async fn get_node<S>(store: &S, id: &BlobId) -> Result<Node, TrieError>
where
    S: BlobGet + ?Sized,
{
    let data = store.get(id).await?;
    Node::decode(&data)
}
