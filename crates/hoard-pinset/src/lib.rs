//! Named pin sets with per-blob reference counts.
//!
//! A *pin set* is a named set of blob IDs the local user wants retained. The
//! store keeps a global refcount per blob counting its distinct pin-set
//! memberships; a blob must stay on the node while its refcount is above
//! zero. Every mutation runs inside a single redb write transaction, so a
//! pin-set change and its refcount adjustment are never observable
//! half-applied and operations on one pin set serialise naturally.
//!
//! Buckets:
//!
//! - `pinsets`: 8-byte big-endian ID → pin-set name
//! - `pinsets-names`: name → ID
//! - `pinsets/<16-hex-id>`: member blob IDs (empty values)
//! - `pinrefcount`: blob ID → uvarint count
//! - `meta`: the monotonic ID sequence

mod store;
mod varint;

pub use store::PinSet;
pub use store::PinSetError;
pub use store::PinSetId;
pub use store::PinSetStore;
pub use store::PinnedSet;
