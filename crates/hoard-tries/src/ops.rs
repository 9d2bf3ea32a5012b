//! Point operations: `get`, `put`, prefix iteration, and shard lookup.

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

/// Looks up `key` in the trie rooted at `root`.
pub async fn get<S>(store: &S, root: &BlobId, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError>
where
    S: BlobGet + ?Sized,
{
    let mut node = get_node(store, root).await?;
    loop {
        if !key.starts_with(node.prefix()) {
            return Ok(None);
        }
        if key.len() == node.prefix().len() || !node.is_parent() {
            return Ok(node.find(key).map(|e| e.value.clone()));
        }
        match node.child(key[node.prefix().len()]) {
            Some(child) => node = get_node(store, &child).await?,
            None => return Ok(None),
        }
    }
}

/// Inserts `key = value` into the trie rooted at `root` and returns the new
/// root. A leaf that grows past [`SPLIT_THRESHOLD`] is split into a parent
/// with one child leaf per next byte; the split and the insert are atomic
/// from the caller's point of view since both surface as the single returned
/// root.
pub async fn put<S>(store: &S, root: &BlobId, key: &[u8], value: &[u8]) -> Result<BlobId, TrieError>
where
    S: BlobGet + BlobPost + ?Sized,
{
    let node = get_node(store, root).await?;
    let node = put_in(store, node, key, value, true).await?;
    post_node(store, &node).await
}

/// Recursive insert on loaded nodes. With `overwrite` false an existing key
/// keeps its value (merge uses this for left-biased folds).
pub(crate) fn put_in<'a, S>(
    store: &'a S,
    mut node: Node,
    key: &'a [u8],
    value: &'a [u8],
    overwrite: bool,
) -> BoxFuture<'a, Result<Node, TrieError>>
where
    S: BlobGet + BlobPost + ?Sized,
{
    Box::pin(async move {
        if !key.starts_with(node.prefix()) {
            return Err(TrieError::BadPrefix);
        }
        if node.is_parent() {
            if key.len() == node.prefix().len() {
                node.upsert(key, value, overwrite);
                return Ok(node);
            }
            let b = key[node.prefix().len()];
            let child = match node.child(b) {
                Some(id) => get_node(store, &id).await?,
                None => {
                    let mut prefix = node.prefix().to_vec();
                    prefix.push(b);
                    Node::leaf(prefix, Vec::new())
                }
            };
            let child = put_in(store, child, key, value, overwrite).await?;
            let id = post_node(store, &child).await?;
            node.set_child(b, id);
            return Ok(node);
        }

        node.upsert(key, value, overwrite);
        if node.entries().len() > SPLIT_THRESHOLD {
            node = split(store, node).await?;
        }
        Ok(node)
    })
}

/// Splits a leaf into a parent: entries are distributed to 256 child leaves
/// by their next byte; an entry whose key equals the leaf prefix stays on the
/// parent.
pub(crate) async fn split<S>(store: &S, leaf: Node) -> Result<Node, TrieError>
where
    S: BlobPost + ?Sized,
{
    let plen = leaf.prefix().len();
    let mut parent_entries = Vec::new();
    let mut groups: Vec<Vec<Entry>> = (0..256).map(|_| Vec::new()).collect();
    let prefix = leaf.prefix().to_vec();
    for entry in leaf.entries() {
        if entry.key.len() == plen {
            parent_entries.push(entry.clone());
        } else {
            groups[entry.key[plen] as usize].push(entry.clone());
        }
    }

    let mut parent = Node::parent(prefix.clone(), parent_entries);
    for (b, group) in groups.into_iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let mut child_prefix = prefix.clone();
        child_prefix.push(b as u8);
        let child = Node::leaf(child_prefix, group);
        let id = post_node(store, &child).await?;
        parent.set_child(b as u8, id);
    }
    Ok(parent)
}

/// Visits every `(key, value)` under `prefix` in key order.
///
/// Fails with [`TrieError::BadPrefix`] when `prefix` is not comparable to the
/// trie's own prefix. Errors from the visitor abort the walk and propagate.
pub async fn for_each<S, F>(store: &S, root: &BlobId, prefix: &[u8], f: &mut F) -> Result<(), TrieError>
where
    S: BlobGet + ?Sized,
    F: FnMut(&[u8], &[u8]) -> Result<(), TrieError> + Send,
{
    let node = get_node(store, root).await?;
    walk(store, node, prefix, f).await
}

fn walk<'a, S, F>(store: &'a S, node: Node, prefix: &'a [u8], f: &'a mut F) -> BoxFuture<'a, Result<(), TrieError>>
where
    S: BlobGet + ?Sized,
    F: FnMut(&[u8], &[u8]) -> Result<(), TrieError> + Send,
{
    Box::pin(async move {
        if node.prefix().starts_with(prefix) {
            // The whole subtree lies at or under the listing prefix.
            for entry in node.entries() {
                f(&entry.key, &entry.value)?;
            }
            for b in 0u8..=255 {
                if let Some(child) = node.child(b) {
                    let child = get_node(store, &child).await?;
                    walk(store, child, prefix, f).await?;
                }
            }
            Ok(())
        } else if prefix.starts_with(node.prefix()) {
            // The listing prefix is deeper; descend along it.
            for entry in node.entries() {
                if entry.key.starts_with(prefix) {
                    f(&entry.key, &entry.value)?;
                }
            }
            if node.is_parent() {
                if let Some(child) = node.child(prefix[node.prefix().len()]) {
                    let child = get_node(store, &child).await?;
                    walk(store, child, prefix, f).await?;
                }
            }
            Ok(())
        } else {
            Err(TrieError::BadPrefix)
        }
    })
}

/// Returns the topmost node covering `prefix`: the first node on the descent
/// whose own prefix extends `prefix`, or a synthetic leaf restricted to
/// `prefix` when the covering node is a leaf that also holds keys outside it.
///
/// This is what a node serves for a shard listing: the returned node's
/// encoding (and therefore its hash) is stable for unchanged content.
pub async fn node_at<S>(store: &S, root: &BlobId, prefix: &[u8]) -> Result<Node, TrieError>
where
    S: BlobGet + ?Sized,
{
    let mut node = get_node(store, root).await?;
    loop {
        if node.prefix().starts_with(prefix) {
            return Ok(node);
        }
        if !prefix.starts_with(node.prefix()) {
            return Err(TrieError::BadPrefix);
        }
        if !node.is_parent() {
            let entries = node
                .entries()
                .iter()
                .filter(|e| e.key.starts_with(prefix))
                .cloned()
                .collect();
            return Ok(Node::leaf(prefix.to_vec(), entries));
        }
        match node.child(prefix[node.prefix().len()]) {
            Some(child) => node = get_node(store, &child).await?,
            None => return Ok(Node::leaf(prefix.to_vec(), Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use hoard_blobs::MemBlobStore;
    use hoard_blobs::hash;

    use super::*;

    async fn empty_root(store: &MemBlobStore) -> BlobId {
        post_node(store, &Node::new()).await.unwrap()
    }

    #[tokio::test]
    async fn put_get_many() {
        let store = MemBlobStore::new();
        let mut root = empty_root(&store).await;
        const N: usize = 1000;
        for i in 0..N {
            let value = format!("test-value-{i}").into_bytes();
            let key = hash(&value);
            root = put(&store, &root, key.as_bytes(), &value).await.unwrap();
        }
        for i in 0..N {
            let want = format!("test-value-{i}").into_bytes();
            let key = hash(&want);
            let got = get(&store, &root, key.as_bytes()).await.unwrap();
            assert_eq!(got.as_deref(), Some(want.as_slice()));
        }
    }

    #[tokio::test]
    async fn put_replaces_and_leaves_others_alone() {
        let store = MemBlobStore::new();
        let mut root = empty_root(&store).await;
        root = put(&store, &root, b"alpha", b"1").await.unwrap();
        root = put(&store, &root, b"beta", b"2").await.unwrap();
        let updated = put(&store, &root, b"alpha", b"3").await.unwrap();

        assert_eq!(get(&store, &updated, b"alpha").await.unwrap().unwrap(), b"3");
        assert_eq!(get(&store, &updated, b"beta").await.unwrap().unwrap(), b"2");
        // The old root is untouched: tries are persistent.
        assert_eq!(get(&store, &root, b"alpha").await.unwrap().unwrap(), b"1");
    }

    #[tokio::test]
    async fn split_produces_parent_and_keeps_keys() {
        let store = MemBlobStore::new();
        let mut root = empty_root(&store).await;
        let mut keys = Vec::new();
        for i in 0u32..400 {
            let key = hash(&i.to_be_bytes());
            keys.push(key);
            root = put(&store, &root, key.as_bytes(), &i.to_be_bytes()).await.unwrap();
        }
        let node = get_node(&store, &root).await.unwrap();
        assert!(node.is_parent(), "400 entries must split past the threshold");
        for (i, key) in keys.iter().enumerate() {
            let got = get(&store, &root, key.as_bytes()).await.unwrap();
            assert_eq!(got.unwrap(), (i as u32).to_be_bytes());
        }
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemBlobStore::new();
        let root = empty_root(&store).await;
        assert_eq!(get(&store, &root, b"nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn for_each_yields_sorted_under_prefix() {
        let store = MemBlobStore::new();
        let mut root = empty_root(&store).await;
        for i in 0u32..600 {
            let key = hash(&i.to_be_bytes());
            root = put(&store, &root, key.as_bytes(), &[]).await.unwrap();
        }

        let mut all = Vec::new();
        for_each(&store, &root, &[], &mut |k, _| {
            all.push(k.to_vec());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 600);
        assert!(all.windows(2).all(|w| w[0] < w[1]));

        let mut under = Vec::new();
        for_each(&store, &root, &all[0][..1], &mut |k, _| {
            under.push(k.to_vec());
            Ok(())
        })
        .await
        .unwrap();
        assert!(!under.is_empty());
        assert!(under.iter().all(|k| k[0] == all[0][0]));
    }

    #[tokio::test]
    async fn node_at_serves_shards() {
        let store = MemBlobStore::new();
        let mut root = empty_root(&store).await;
        for i in 0u32..600 {
            let key = hash(&i.to_be_bytes());
            root = put(&store, &root, key.as_bytes(), &[]).await.unwrap();
        }
        let top = node_at(&store, &root, &[]).await.unwrap();
        assert!(top.is_parent());

        // Every byte shard together re-covers the full key set.
        let mut total = 0;
        for b in 0u8..=255 {
            let shard = node_at(&store, &root, &[b]).await.unwrap();
            let mut count = 0;
            if shard.is_parent() || !shard.entries().is_empty() {
                for_each(&store, &post_node(&store, &shard).await.unwrap(), &[b], &mut |_, _| {
                    count += 1;
                    Ok(())
                })
                .await
                .unwrap();
            }
            total += count;
        }
        assert_eq!(total, 600);
    }
}
