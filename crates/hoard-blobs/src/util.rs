//! Helpers over the storage capabilities.

use futures::future::BoxFuture;

use crate::id::BlobId;
use crate::store::BlobDelete;
use crate::store::BlobError;
use crate::store::BlobGet;
use crate::store::BlobList;
use crate::store::BlobPost;
use crate::store::BlobSet;

/// IDs fetched per `list` call before recursing on narrower prefixes.
const LIST_BUF: usize = 1 << 10;

/// Copies one blob from `src` to `dst`, verifying that the destination
/// derives the same ID.
pub async fn copy<S, D>(src: &S, dst: &D, id: &BlobId) -> Result<(), BlobError>
where
    S: BlobGet + ?Sized,
    D: BlobPost + ?Sized,
{
    let data = src.get(id).await?;
    let id2 = dst.post(&data).await?;
    if id2 != *id {
        return Err(BlobError::Corrupt { wanted: *id, got: id2 });
    }
    Ok(())
}

/// Visits every ID in `store`.
pub async fn for_each<L, F>(store: &L, f: &mut F) -> Result<(), BlobError>
where
    L: BlobList + ?Sized,
    F: FnMut(BlobId) -> Result<(), BlobError> + Send,
{
    for_each_id(store, Vec::new(), f).await
}

/// Visits every ID under `prefix`, recursing into one-byte extensions
/// whenever a listing overflows. This is the consumer side of the `TooMany`
/// backpressure protocol.
pub fn for_each_id<'a, L, F>(store: &'a L, prefix: Vec<u8>, f: &'a mut F) -> BoxFuture<'a, Result<(), BlobError>>
where
    L: BlobList + ?Sized,
    F: FnMut(BlobId) -> Result<(), BlobError> + Send,
{
    Box::pin(async move {
        let mut ids = vec![BlobId::ZERO; LIST_BUF];
        match store.list(&prefix, &mut ids).await {
            Ok(n) => {
                for id in &ids[..n] {
                    f(*id)?;
                }
                Ok(())
            }
            Err(BlobError::TooMany) => {
                for b in 0u8..=255 {
                    let mut narrower = prefix.clone();
                    narrower.push(b);
                    for_each_id(store, narrower, f).await?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    })
}

/// Collects every ID under `prefix` into a vector.
pub async fn collect_ids<L>(store: &L, prefix: &[u8]) -> Result<Vec<BlobId>, BlobError>
where
    L: BlobList + ?Sized,
{
    let mut out = Vec::new();
    for_each_id(store, prefix.to_vec(), &mut |id| {
        out.push(id);
        Ok(())
    })
    .await?;
    Ok(out)
}

/// Deletes every blob under `prefix` that `keep` does not contain. Returns
/// the number of blobs deleted.
pub async fn gc<T>(target: &T, prefix: &[u8], keep: &dyn BlobSet) -> Result<u64, BlobError>
where
    T: BlobList + BlobDelete + ?Sized,
{
    let candidates = collect_ids(target, prefix).await?;
    let mut deleted = 0;
    for id in candidates {
        if !keep.contains(&id).await? {
            target.delete(&id).await?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Smallest byte string strictly greater than every string prefixed by
/// `prefix`, or `None` when the prefix is all `0xff` (no upper bound).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
