//! The crawler: walks peers' published tries and feeds the blob router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use hoard_blobs::BlobId;
use hoard_swarm::PeerId;
use hoard_swarm::PeerRouter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::bitstrings::BitString;
use crate::error::NetError;
use crate::router::BlobRouter;
use crate::wire::ListBlobsReq;

/// Routing-trie keys are `blob_id || peer_id`; sharding can never go deeper.
const MAX_SHARD_DEPTH: usize = 64;

/// Default crawl period.
pub const CRAWL_INTERVAL: Duration = Duration::from_secs(60);

/// A crawler bookmark: the last observed trie-node hash for one peer under
/// one byte prefix. Unchanged hashes let a whole shard be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShardId {
    peer: PeerId,
    prefix: Vec<u8>,
}

pub struct CrawlerParams {
    pub peer_router: Arc<PeerRouter>,
    pub blob_router: Arc<BlobRouter>,
    pub interval: Duration,
}

/// Periodically indexes peers' pin supersets into the local blob router.
pub struct Crawler {
    peer_router: Arc<PeerRouter>,
    blob_router: Arc<BlobRouter>,
    shards: Mutex<HashMap<ShardId, BlobId>>,
    interval: Duration,
}

impl Crawler {
    pub fn new(params: CrawlerParams) -> Arc<Self> {
        Arc::new(Crawler {
            peer_router: params.peer_router,
            blob_router: params.blob_router,
            shards: Mutex::new(HashMap::new()),
            interval: params.interval,
        })
    }

    /// Runs crawl ticks until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("crawler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.crawl().await;
                }
            }
        }
    }

    /// One crawl tick over every known peer. Per-peer errors abort that
    /// peer's tick and are retried on the next one.
    pub async fn crawl(&self) {
        let mut peers = self.peer_router.one_hop();
        for peer in self.peer_router.multi_hop() {
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }

        for peer in peers {
            let accept = self.blob_router.would_accept();
            for prefix in accept.enum_byte_prefixes() {
                if !accept.accepts(&BitString::from_bytes(&prefix)) {
                    continue;
                }
                match self.index_peer(peer, prefix).await {
                    Ok(()) => {}
                    Err(NetError::ShouldEvictThis) => continue,
                    Err(e) => {
                        warn!(peer = %peer.fmt_short(), error = %e, "crawl aborted for peer");
                        break;
                    }
                }
            }
        }
    }

    /// Indexes one `(peer, prefix)` shard, recursing into narrower prefixes
    /// when the peer signals sharding or a child's hash changed.
    fn index_peer(&self, peer: PeerId, prefix: Vec<u8>) -> BoxFuture<'_, Result<(), NetError>> {
        Box::pin(async move {
            let shard_id = ShardId {
                peer,
                prefix: prefix.clone(),
            };
            let Some((routing_tag, next_hop)) = self.peer_router.lookup(&peer) else {
                self.shards.lock().remove(&shard_id);
                return Err(NetError::NoRouteToPeer { peer });
            };

            let req = ListBlobsReq {
                routing_tag,
                prefix: prefix.clone(),
            };
            let res = match self.blob_router.request(&next_hop, &req).await {
                Ok(res) => res,
                Err(e) => {
                    self.shards.lock().remove(&shard_id);
                    return Err(e);
                }
            };

            // Sharded below this point.
            if res.trie_hash.is_empty() || res.trie_data.is_empty() {
                self.shards.lock().remove(&shard_id);
                if prefix.len() >= MAX_SHARD_DEPTH {
                    return Ok(());
                }
                for b in 0u8..=255 {
                    let mut narrower = prefix.clone();
                    narrower.push(b);
                    self.index_peer(peer, narrower).await?;
                }
                return Ok(());
            }

            let node = hoard_tries::Node::decode(&res.trie_data)?;
            // Hash the bytes we received rather than trusting the peer's
            // claimed hash.
            let node_hash = hoard_blobs::hash(&res.trie_data);

            if node.is_parent() {
                for b in 0u8..=255 {
                    let Some(child) = node.child(b) else { continue };
                    let mut narrower = prefix.clone();
                    narrower.push(b);
                    let child_shard = ShardId {
                        peer,
                        prefix: narrower.clone(),
                    };
                    if self.shards.lock().get(&child_shard) == Some(&child) {
                        continue;
                    }
                    self.index_peer(peer, narrower).await?;
                }
                self.shards.lock().insert(shard_id, node_hash);
                return Ok(());
            }

            for entry in node.entries() {
                if entry.key.len() != 64 {
                    debug!(peer = %peer.fmt_short(), len = entry.key.len(), "skipping malformed routing entry");
                    continue;
                }
                let blob = BlobId::from_slice(&entry.key[..32]);
                let holder = PeerId::from_slice(&entry.key[32..]);
                match self.blob_router.put(blob, holder).await {
                    Ok(()) => {}
                    Err(NetError::ShouldEvictThis) => {}
                    Err(e) => return Err(e),
                }
            }
            self.shards.lock().insert(shard_id, node_hash);
            Ok(())
        })
    }
}
