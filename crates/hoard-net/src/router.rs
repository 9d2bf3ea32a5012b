//! The blob router: kad table plus the shard-listing service.

use std::sync::Arc;

use bytes::Bytes;
use hoard_blobs::BlobId;
use hoard_blobs::MemBlobStore;
use hoard_swarm::PeerId;
use hoard_swarm::SwarmChannel;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::bitstrings::BitPrefixSet;
use crate::error::NetError;
use crate::kad::BUCKET_CAP;
use crate::kad::KadRoutingTable;
use crate::wire;
use crate::wire::ListBlobsReq;
use crate::wire::ListBlobsRes;

/// Upper bound on a served trie-node encoding; larger nodes answer "please
/// shard" instead.
pub const MAX_NODE_SIZE: usize = 1 << 14;

pub struct BlobRouterParams {
    pub channel: SwarmChannel,
    pub bucket_cap: usize,
    pub max_node_size: usize,
}

impl BlobRouterParams {
    pub fn new(channel: SwarmChannel) -> Self {
        BlobRouterParams {
            channel,
            bucket_cap: BUCKET_CAP,
            max_node_size: MAX_NODE_SIZE,
        }
    }
}

/// Maps blob IDs to the peers that hold them.
///
/// Two data structures cooperate here. The *kad table* answers `who_has`
/// locally. The *routing trie* is the node's published index: keys are
/// `blob_id || peer_id` with empty values, stored as content-addressed nodes
/// in an in-memory metadata store, and served to crawling peers shard by
/// shard. Local pins enter the trie with the local peer ID; crawled entries
/// enter both structures, so knowledge spreads hop by hop.
pub struct BlobRouter {
    local: PeerId,
    table: KadRoutingTable,
    metadata: MemBlobStore,
    root: Mutex<BlobId>,
    channel: SwarmChannel,
    max_node_size: usize,
}

impl BlobRouter {
    pub async fn new(params: BlobRouterParams) -> Result<Arc<Self>, NetError> {
        let local = params.channel.local_id();
        let metadata = MemBlobStore::new();
        let root = hoard_tries::post_node(&metadata, &hoard_tries::Node::new()).await?;

        let router = Arc::new(BlobRouter {
            local,
            table: KadRoutingTable::new(local, params.bucket_cap),
            metadata,
            root: Mutex::new(root),
            channel: params.channel.clone(),
            max_node_size: params.max_node_size,
        });

        // The channel must not keep the router alive: a handler holding an
        // Arc while the router holds the channel would cycle and leak.
        let handler = Arc::downgrade(&router);
        params.channel.on_ask(Arc::new(move |from, payload| {
            let handler = handler.upgrade();
            Box::pin(async move {
                match handler {
                    Some(router) => router.handle_ask(from, payload).await,
                    None => Bytes::new(),
                }
            })
        }));
        Ok(router)
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// The peers currently claimed to hold `blob`.
    pub fn who_has(&self, blob: &BlobId) -> Vec<PeerId> {
        self.table.who_has(blob)
    }

    /// The ID-space prefixes the kad table still has capacity for.
    pub fn would_accept(&self) -> BitPrefixSet {
        self.table.would_accept()
    }

    /// Records that `peer` holds `blob`: the entry goes into the kad table
    /// (unless it is the local peer, which needs no routing) and into the
    /// published routing trie.
    pub async fn put(&self, blob: BlobId, peer: PeerId) -> Result<(), NetError> {
        if peer != self.local {
            self.table.put(blob, peer)?;
        }
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(blob.as_bytes());
        key.extend_from_slice(peer.as_bytes());
        let mut root = self.root.lock().await;
        *root = hoard_tries::put(&self.metadata, &root, &key, &[]).await?;
        Ok(())
    }

    /// Sends a shard-listing request toward `next_hop`.
    pub async fn request(&self, next_hop: &PeerId, req: &ListBlobsReq) -> Result<ListBlobsRes, NetError> {
        let payload = wire::encode(req)?;
        let reply = self.channel.ask(next_hop, &payload).await?;
        if reply.is_empty() {
            return Err(NetError::storage(format!(
                "peer {} did not answer the listing",
                next_hop.fmt_short()
            )));
        }
        wire::decode(&reply)
    }

    async fn handle_ask(&self, from: PeerId, payload: Bytes) -> Bytes {
        let req: ListBlobsReq = match wire::decode(&payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(from = %from.fmt_short(), error = %e, "bad listing request");
                return Bytes::new();
            }
        };
        let res = self.handle_list_blobs(&req).await;
        match wire::encode(&res) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "listing reply failed to encode");
                Bytes::new()
            }
        }
    }

    async fn handle_list_blobs(&self, req: &ListBlobsReq) -> ListBlobsRes {
        let root = *self.root.lock().await;
        let node = match hoard_tries::node_at(&self.metadata, &root, &req.prefix).await {
            Ok(node) => node,
            Err(e) => {
                debug!(error = %e, "listing walk failed");
                return ListBlobsRes::default();
            }
        };
        let data = match node.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "node failed to encode");
                return ListBlobsRes::default();
            }
        };
        if data.len() > self.max_node_size {
            // Too large to return whole: ask the caller to shard.
            return ListBlobsRes::default();
        }
        ListBlobsRes {
            trie_hash: hoard_blobs::hash(&data).as_bytes().to_vec(),
            trie_data: data,
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use hoard_blobs::hash;
    use hoard_swarm::AskSwarm;
    use hoard_swarm::MemRealm;
    use hoard_swarm::MuxSwarm;

    use super::*;
    use crate::wire::CHANNEL_BLOB_ROUTER;

    async fn pair() -> (Arc<BlobRouter>, Arc<BlobRouter>, PeerId, PeerId) {
        let realm = MemRealm::new();
        let a = realm.swarm(SigningKey::from_bytes(&[1; 32]));
        let b = realm.swarm(SigningKey::from_bytes(&[2; 32]));
        a.add_peer(b.local_id());
        b.add_peer(a.local_id());
        let (a_id, b_id) = (a.local_id(), b.local_id());

        let mux_a = MuxSwarm::new(Arc::new(a));
        let mux_b = MuxSwarm::new(Arc::new(b));
        let ra = BlobRouter::new(BlobRouterParams::new(mux_a.channel(CHANNEL_BLOB_ROUTER)))
            .await
            .unwrap();
        let rb = BlobRouter::new(BlobRouterParams::new(mux_b.channel(CHANNEL_BLOB_ROUTER)))
            .await
            .unwrap();
        (ra, rb, a_id, b_id)
    }

    #[tokio::test]
    async fn put_feeds_table_and_trie() {
        let (ra, _rb, a_id, b_id) = pair().await;
        let blob = hash(b"routed");
        ra.put(blob, b_id).await.unwrap();
        assert_eq!(ra.who_has(&blob), vec![b_id]);
        // Local entries are published but not routed.
        ra.put(blob, a_id).await.unwrap();
        assert_eq!(ra.who_has(&blob), vec![b_id]);
    }

    #[tokio::test]
    async fn listing_serves_published_entries() {
        let (ra, rb, a_id, b_id) = pair().await;
        let blob = hash(b"served");
        rb.put(blob, b_id).await.unwrap();

        let req = ListBlobsReq {
            routing_tag: b_id.as_bytes().to_vec(),
            prefix: Vec::new(),
        };
        let res = ra.request(&b_id, &req).await.unwrap();
        assert!(!res.trie_data.is_empty());
        assert_eq!(res.trie_hash, hash(&res.trie_data).as_bytes().to_vec());

        let node = hoard_tries::Node::decode(&res.trie_data).unwrap();
        let entry = &node.entries()[0];
        assert_eq!(&entry.key[..32], blob.as_bytes());
        assert_eq!(&entry.key[32..], b_id.as_bytes());
        let _ = a_id;
    }

    #[tokio::test]
    async fn oversized_listing_asks_for_sharding() {
        let realm = MemRealm::new();
        let a = realm.swarm(SigningKey::from_bytes(&[3; 32]));
        let b = realm.swarm(SigningKey::from_bytes(&[4; 32]));
        a.add_peer(b.local_id());
        b.add_peer(a.local_id());
        let b_id = b.local_id();

        let mux_a = MuxSwarm::new(Arc::new(a));
        let mux_b = MuxSwarm::new(Arc::new(b));
        let ra = BlobRouter::new(BlobRouterParams::new(mux_a.channel(CHANNEL_BLOB_ROUTER)))
            .await
            .unwrap();
        let rb = BlobRouter::new(BlobRouterParams {
            channel: mux_b.channel(CHANNEL_BLOB_ROUTER),
            bucket_cap: BUCKET_CAP,
            // Absurdly small: every real node is too large.
            max_node_size: 8,
        })
        .await
        .unwrap();
        rb.put(hash(b"big"), b_id).await.unwrap();

        let req = ListBlobsReq {
            routing_tag: b_id.as_bytes().to_vec(),
            prefix: Vec::new(),
        };
        let res = ra.request(&b_id, &req).await.unwrap();
        assert!(res.trie_data.is_empty(), "small cap must trigger shard signal");
        let _ = rb;
    }
}
