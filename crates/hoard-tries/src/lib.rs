//! Persistent, content-addressed 256-ary radix trie.
//!
//! A trie node is itself a blob: its reference is the BLAKE3 ID of its
//! deterministic encoding, and its children are references to further node
//! blobs. Mutation never updates a node in place; `put` writes new nodes
//! along the touched path and returns a new root, leaving old nodes as
//! garbage for [`gc`] to reap. Because equal logical content encodes to equal
//! bytes, two nodes holding the same entries always share an ID, which is
//! what lets peers compare subtree hashes instead of re-walking unchanged
//! shards.
//!
//! The trie is a DAG by construction: references are hashes, so cycles
//! cannot be expressed.

mod merge;
mod node;
mod ops;
mod sync;

pub use merge::merge;
pub use node::Entry;
pub use node::Node;
pub use node::SPLIT_THRESHOLD;
pub use node::TrieError;
pub use node::get_node;
pub use node::post_node;
pub use ops::for_each;
pub use ops::get;
pub use ops::node_at;
pub use ops::put;
pub use sync::gc;
pub use sync::reachable;
pub use sync::sync;
