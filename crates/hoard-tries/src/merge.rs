//! Divide-and-conquer trie merge.

use futures::future::BoxFuture;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobPost;

use crate::node::Entry;
use crate::node::Node;
use crate::node::SPLIT_THRESHOLD;
use crate::node::TrieError;
use crate::node::get_node;
use crate::node::post_node;
use crate::ops::put_in;
use crate::ops::split;

/// Merges the tries rooted at `roots` into one and returns its root.
///
/// Over key sets the merge is associative and commutative; where two tries
/// bind the same key to different values the rightmost root wins.
pub async fn merge<S>(store: &S, roots: &[BlobId]) -> Result<BlobId, TrieError>
where
    S: BlobGet + BlobPost + ?Sized,
{
    merge_range(store, roots).await
}

fn merge_range<'a, S>(store: &'a S, roots: &'a [BlobId]) -> BoxFuture<'a, Result<BlobId, TrieError>>
where
    S: BlobGet + BlobPost + ?Sized,
{
    Box::pin(async move {
        match roots {
            [] => post_node(store, &Node::new()).await,
            [root] => Ok(*root),
            _ => {
                let mid = roots.len() / 2;
                let left = merge_range(store, &roots[..mid]).await?;
                let right = merge_range(store, &roots[mid..]).await?;
                merge2(store, left, right).await
            }
        }
    })
}

async fn merge2<S>(store: &S, left: BlobId, right: BlobId) -> Result<BlobId, TrieError>
where
    S: BlobGet + BlobPost + ?Sized,
{
    if left == right {
        return Ok(left);
    }
    let a = get_node(store, &left).await?;
    let b = get_node(store, &right).await?;
    let merged = merge_nodes(store, a, b).await?;
    post_node(store, &merged).await
}

/// Structural merge of two loaded nodes. Right-biased on equal keys.
fn merge_nodes<'a, S>(store: &'a S, a: Node, b: Node) -> BoxFuture<'a, Result<Node, TrieError>>
where
    S: BlobGet + BlobPost + ?Sized,
{
    Box::pin(async move {
        if a.prefix() != b.prefix() {
            return merge_unaligned(store, a, b).await;
        }

        match (a.is_parent(), b.is_parent()) {
            (false, false) => {
                let mut merged = Node::leaf(a.prefix().to_vec(), a.entries().to_vec());
                for entry in b.entries() {
                    merged.upsert(&entry.key, &entry.value, true);
                }
                if merged.entries().len() > SPLIT_THRESHOLD {
                    merged = split(store, merged).await?;
                }
                Ok(merged)
            }
            // Shapes differ: split the leaf side, then merge parent against
            // parent.
            (false, true) => {
                let a = split(store, a).await?;
                merge_nodes(store, a, b).await
            }
            (true, false) => {
                let b = split(store, b).await?;
                merge_nodes(store, a, b).await
            }
            (true, true) => {
                let mut merged = Node::parent(a.prefix().to_vec(), a.entries().to_vec());
                for entry in b.entries() {
                    merged.upsert(&entry.key, &entry.value, true);
                }
                for i in 0u8..=255 {
                    match (a.child(i), b.child(i)) {
                        (Some(x), Some(y)) => {
                            let id = merge2(store, x, y).await?;
                            merged.set_child(i, id);
                        }
                        (Some(x), None) => merged.set_child(i, x),
                        (None, Some(y)) => merged.set_child(i, y),
                        (None, None) => {}
                    }
                }
                Ok(merged)
            }
        }
    })
}

/// Fallback when the two nodes' prefixes disagree: rebuild from the shared
/// prefix by folding both entry sets into a fresh trie, right side last.
async fn merge_unaligned<S>(store: &S, a: Node, b: Node) -> Result<Node, TrieError>
where
    S: BlobGet + BlobPost + ?Sized,
{
    let common: Vec<u8> = a
        .prefix()
        .iter()
        .zip(b.prefix().iter())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| *x)
        .collect();

    let mut merged = Node::leaf(common, Vec::new());
    for node in [&a, &b] {
        for entry in collect_entries(store, node).await? {
            merged = put_in(store, merged, &entry.key, &entry.value, true).await?;
        }
    }
    Ok(merged)
}

fn collect_entries<'a, S>(store: &'a S, node: &'a Node) -> BoxFuture<'a, Result<Vec<Entry>, TrieError>>
where
    S: BlobGet + ?Sized,
{
    Box::pin(async move {
        let mut out = node.entries().to_vec();
        for b in 0u8..=255 {
            if let Some(child) = node.child(b) {
                let child = get_node(store, &child).await?;
                out.extend(collect_entries(store, &child).await?);
            }
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use hoard_blobs::MemBlobStore;
    use hoard_blobs::hash;

    use super::*;
    use crate::ops::for_each;
    use crate::ops::get;
    use crate::ops::put;

    async fn build(store: &MemBlobStore, range: std::ops::Range<u32>) -> BlobId {
        let mut root = post_node(store, &Node::new()).await.unwrap();
        for i in range {
            let key = hash(&i.to_be_bytes());
            root = put(store, &root, key.as_bytes(), &[]).await.unwrap();
        }
        root
    }

    async fn keys_of(store: &MemBlobStore, root: &BlobId) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        for_each(store, root, &[], &mut |k, _| {
            keys.push(k.to_vec());
            Ok(())
        })
        .await
        .unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn merge_is_union_and_commutative() {
        let store = MemBlobStore::new();
        let a = build(&store, 0..300).await;
        let b = build(&store, 200..500).await;

        let ab = merge(&store, &[a, b]).await.unwrap();
        let ba = merge(&store, &[b, a]).await.unwrap();
        assert_eq!(ab, ba, "set merge must not depend on order");

        let union = keys_of(&store, &ab).await;
        assert_eq!(union.len(), 500);
        for i in 0u32..500 {
            let key = hash(&i.to_be_bytes());
            assert!(get(&store, &ab, key.as_bytes()).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn merge_is_associative_over_key_sets() {
        let store = MemBlobStore::new();
        let a = build(&store, 0..100).await;
        let b = build(&store, 50..150).await;
        let c = build(&store, 140..200).await;

        let left = merge(&store, &[merge(&store, &[a, b]).await.unwrap(), c]).await.unwrap();
        let right = merge(&store, &[a, merge(&store, &[b, c]).await.unwrap()]).await.unwrap();
        assert_eq!(keys_of(&store, &left).await, keys_of(&store, &right).await);
    }

    #[tokio::test]
    async fn right_root_wins_on_value_conflict() {
        let store = MemBlobStore::new();
        let empty = post_node(&store, &Node::new()).await.unwrap();
        let a = put(&store, &empty, b"shared-key", b"left").await.unwrap();
        let b = put(&store, &empty, b"shared-key", b"right").await.unwrap();

        let merged = merge(&store, &[a, b]).await.unwrap();
        assert_eq!(get(&store, &merged, b"shared-key").await.unwrap().unwrap(), b"right");
    }

    #[tokio::test]
    async fn merge_mixed_shapes() {
        let store = MemBlobStore::new();
        let big = build(&store, 0..400).await; // parent
        let small = build(&store, 400..410).await; // leaf

        let merged = merge(&store, &[big, small]).await.unwrap();
        assert_eq!(keys_of(&store, &merged).await.len(), 410);
    }
}
