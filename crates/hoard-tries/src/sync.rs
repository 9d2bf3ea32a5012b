//! Closure copy and reachability GC for trie storage.

use std::collections::HashSet;

use futures::future::BoxFuture;
use hoard_blobs::BlobDelete;
use hoard_blobs::BlobError;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobList;
use hoard_blobs::BlobPost;
use hoard_blobs::util::collect_ids;

use crate::node::Node;
use crate::node::TrieError;

/// Copies the reachable closure of node blobs from `src` to `dst`, depth
/// first from `root`. A blob already present in `dst` is skipped along with
/// its whole subtree: content addressing guarantees an identical subtree
/// below it. Children are copied before their parent so `dst` never holds a
/// node with dangling references.
///
/// A node blob missing from `src` surfaces as `NotFound` and is fatal for
/// this root.
pub fn sync<'a, S, D>(src: &'a S, dst: &'a D, root: BlobId) -> BoxFuture<'a, Result<(), TrieError>>
where
    S: BlobGet + ?Sized,
    D: BlobGet + BlobPost + ?Sized,
{
    Box::pin(async move {
        if dst.exists(&root).await? {
            return Ok(());
        }
        let data = src.get(&root).await?;
        let node = Node::decode(&data)?;
        for b in 0u8..=255 {
            if let Some(child) = node.child(b) {
                sync(src, dst, child).await?;
            }
        }
        let posted = dst.post(&data).await?;
        if posted != root {
            return Err(TrieError::Blob {
                source: BlobError::Corrupt { wanted: root, got: posted },
            });
        }
        Ok(())
    })
}

/// Collects the set of node blob IDs reachable from `roots`.
pub async fn reachable<S>(store: &S, roots: &[BlobId]) -> Result<HashSet<BlobId>, TrieError>
where
    S: BlobGet + ?Sized,
{
    let mut refs = HashSet::new();
    for root in roots {
        add_refs(store, *root, &mut refs).await?;
    }
    Ok(refs)
}

fn add_refs<'a, S>(store: &'a S, id: BlobId, refs: &'a mut HashSet<BlobId>) -> BoxFuture<'a, Result<(), TrieError>>
where
    S: BlobGet + ?Sized,
{
    Box::pin(async move {
        if refs.contains(&id) {
            return Ok(());
        }
        let node = crate::node::get_node(store, &id).await?;
        for b in 0u8..=255 {
            if let Some(child) = node.child(b) {
                add_refs(store, child, refs).await?;
            }
        }
        refs.insert(id);
        Ok(())
    })
}

/// Deletes every blob in `store` that is not reachable from `roots`. Returns
/// the number of blobs deleted.
pub async fn gc<S>(store: &S, roots: &[BlobId]) -> Result<u64, TrieError>
where
    S: BlobGet + BlobList + BlobDelete + ?Sized,
{
    let refs = reachable(store, roots).await?;
    let all = collect_ids(store, &[]).await?;
    let mut deleted = 0;
    for id in all {
        if !refs.contains(&id) {
            store.delete(&id).await?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use hoard_blobs::MemBlobStore;
    use hoard_blobs::hash;

    use super::*;
    use crate::node::post_node;
    use crate::ops::for_each;
    use crate::ops::get;
    use crate::ops::put;

    async fn build(store: &MemBlobStore, range: std::ops::Range<u32>) -> BlobId {
        let mut root = post_node(store, &Node::new()).await.unwrap();
        for i in range {
            let value = i.to_be_bytes().to_vec();
            let key = hash(&value);
            root = put(store, &root, key.as_bytes(), &value).await.unwrap();
        }
        root
    }

    #[tokio::test]
    async fn sync_copies_whole_closure() {
        let src = MemBlobStore::new();
        let dst = MemBlobStore::new();
        let root = build(&src, 0..100).await;

        sync(&src, &dst, root).await.unwrap();

        let mut src_pairs = Vec::new();
        for_each(&src, &root, &[], &mut |k, v| {
            src_pairs.push((k.to_vec(), v.to_vec()));
            Ok(())
        })
        .await
        .unwrap();

        let mut dst_pairs = Vec::new();
        for_each(&dst, &root, &[], &mut |k, v| {
            dst_pairs.push((k.to_vec(), v.to_vec()));
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(src_pairs.len(), 100);
        assert_eq!(src_pairs, dst_pairs);

        for i in 0u32..100 {
            let value = i.to_be_bytes().to_vec();
            let key = hash(&value);
            assert_eq!(get(&dst, &root, key.as_bytes()).await.unwrap().unwrap(), value);
        }
    }

    #[tokio::test]
    async fn sync_missing_node_is_fatal() {
        let src = MemBlobStore::new();
        let dst = MemBlobStore::new();
        let missing = hash(b"never stored");
        let err = sync(&src, &dst, missing).await.unwrap_err();
        assert!(matches!(err, TrieError::Blob { source } if source.is_not_found()));
    }

    #[tokio::test]
    async fn gc_keeps_reachable_and_drops_the_rest() {
        let store = MemBlobStore::new();
        let keep = build(&store, 0..400).await;
        let dead = build(&store, 1000..1400).await;

        let dropped_refs = reachable(&store, &[dead]).await.unwrap();
        let kept_refs = reachable(&store, &[keep]).await.unwrap();

        gc(&store, &[keep]).await.unwrap();

        for id in &kept_refs {
            assert!(store.exists(id).await.unwrap());
        }
        for id in dropped_refs.difference(&kept_refs) {
            assert!(!store.exists(id).await.unwrap());
        }
        // The kept trie still reads back.
        for i in 0u32..400 {
            let value = i.to_be_bytes().to_vec();
            let key = hash(&value);
            assert_eq!(get(&store, &keep, key.as_bytes()).await.unwrap().unwrap(), value);
        }
    }
}
