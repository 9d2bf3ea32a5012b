//! Storage capability traits and the shared blob error type.
//!
//! Components take the narrowest capability they need: the trie walks a
//! `BlobGet + BlobPost`, the crawler's route table only lists, GC needs
//! `BlobList + BlobDelete`. `BlobStore` is the composition of all four and is
//! what the node's local data store provides.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

use crate::id::BlobId;

/// Errors from blob storage and retrieval.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BlobError {
    /// Blob not found.
    #[snafu(display("blob not found: {id}"))]
    NotFound {
        /// The ID that was not present.
        id: BlobId,
    },

    /// A prefix enumerates more IDs than the caller's buffer holds. Callers
    /// recover by recursing into narrower prefixes.
    #[snafu(display("prefix enumerates more ids than the buffer holds"))]
    TooMany,

    /// The store is at capacity.
    #[snafu(display("store is full"))]
    Full,

    /// Blob exceeds the maximum size.
    #[snafu(display("blob size {size} exceeds maximum {max}"))]
    TooLarge { size: usize, max: usize },

    /// Bytes received for an ID hash to a different ID.
    #[snafu(display("blob is corrupt: wanted {wanted}, got {got}"))]
    Corrupt { wanted: BlobId, got: BlobId },

    /// The operation was cancelled.
    #[snafu(display("operation cancelled"))]
    Cancelled,

    /// Underlying storage failure.
    #[snafu(display("storage error: {message}"))]
    Storage { message: String },
}

impl BlobError {
    pub fn storage(e: impl std::fmt::Display) -> Self {
        BlobError::Storage { message: e.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// Read capability: fetch and probe blobs by ID.
///
/// `get` returns [`Bytes`], lending the store's memory where the
/// implementation allows it instead of forcing a copy per call.
#[async_trait]
pub trait BlobGet: Send + Sync {
    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError>;

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError>;
}

/// Write capability: content-addressed insert.
#[async_trait]
pub trait BlobPost: Send + Sync {
    /// Stores `data` if absent and returns its ID. Idempotent.
    async fn post(&self, data: &[u8]) -> Result<BlobId, BlobError>;
}

/// Delete capability.
///
/// Deletion is unconditional; refcount discipline lives in the pin-set store,
/// not here.
#[async_trait]
pub trait BlobDelete: Send + Sync {
    async fn delete(&self, id: &BlobId) -> Result<(), BlobError>;
}

/// Listing capability.
#[async_trait]
pub trait BlobList: Send + Sync {
    /// Fills `ids` with every ID under `prefix`, returning the count.
    ///
    /// Fails with [`BlobError::TooMany`] when the prefix enumerates more IDs
    /// than `ids` holds; the caller then recurses on the 256 one-byte
    /// extensions of the prefix.
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError>;
}

/// A read-only set of blob IDs: membership plus bounded listing.
#[async_trait]
pub trait BlobSet: BlobList {
    async fn contains(&self, id: &BlobId) -> Result<bool, BlobError>;
}

/// The full store contract: get, post, delete, list.
pub trait BlobStore: BlobGet + BlobPost + BlobDelete + BlobList {}

impl<T: BlobGet + BlobPost + BlobDelete + BlobList + ?Sized> BlobStore for T {}

#[async_trait]
impl<T: BlobGet + ?Sized> BlobGet for Arc<T> {
    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        (**self).get(id).await
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        (**self).exists(id).await
    }
}

#[async_trait]
impl<T: BlobPost + ?Sized> BlobPost for Arc<T> {
    async fn post(&self, data: &[u8]) -> Result<BlobId, BlobError> {
        (**self).post(data).await
    }
}

#[async_trait]
impl<T: BlobDelete + ?Sized> BlobDelete for Arc<T> {
    async fn delete(&self, id: &BlobId) -> Result<(), BlobError> {
        (**self).delete(id).await
    }
}

#[async_trait]
impl<T: BlobList + ?Sized> BlobList for Arc<T> {
    async fn list(&self, prefix: &[u8], ids: &mut [BlobId]) -> Result<usize, BlobError> {
        (**self).list(prefix, ids).await
    }
}

#[async_trait]
impl<T: BlobSet + ?Sized> BlobSet for Arc<T> {
    async fn contains(&self, id: &BlobId) -> Result<bool, BlobError> {
        (**self).contains(id).await
    }
}
