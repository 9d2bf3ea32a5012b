//! Content-addressed blob primitives.
//!
//! Everything stored or exchanged by a hoard node is a *blob*: an opaque byte
//! string addressed by the BLAKE3 hash of its contents. This crate provides:
//!
//! - **Blob IDs**: 32-byte content addresses with a URL-safe base64 text form
//! - **Storage capabilities**: small traits (`BlobGet`, `BlobPost`,
//!   `BlobDelete`, `BlobList`) that components compose instead of depending on
//!   a monolithic store interface
//! - **Local stores**: an in-memory store and a redb-backed persistent store
//! - **Listing utilities**: the prefix-recursion protocol that bounds every
//!   enumeration in the system
//!
//! ## Listing protocol
//!
//! `BlobList::list` fills a caller-provided buffer and fails with `TooMany`
//! when a prefix enumerates more IDs than fit. Callers recover by recursing
//! into the 256 one-byte extensions of the prefix (`util::for_each_id`). This
//! is the universal backpressure primitive: no component ever materialises an
//! unbounded ID set in one call.

pub mod disk;
pub mod id;
pub mod mem;
pub mod store;
pub mod util;

pub use disk::RedbBlobStore;
pub use id::BlobId;
pub use id::MAX_BLOB_SIZE;
pub use id::hash;
pub use mem::MemBlobStore;
pub use store::BlobDelete;
pub use store::BlobError;
pub use store::BlobGet;
pub use store::BlobList;
pub use store::BlobPost;
pub use store::BlobSet;
pub use store::BlobStore;
