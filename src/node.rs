//! Node assembly: local storage, pin sets, and the overlay services.

use std::sync::Arc;

use bytes::Bytes;
use ed25519_dalek::SigningKey;
use hoard_blobs::BlobError;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobPost;
use hoard_blobs::RedbBlobStore;
use hoard_net::BlobRouter;
use hoard_net::BlobRouterParams;
use hoard_net::Crawler;
use hoard_net::CrawlerParams;
use hoard_net::NetError;
use hoard_net::OneHopPull;
use hoard_net::PersistService;
use hoard_net::PersistServiceParams;
use hoard_net::wire::CHANNEL_BLOB_ROUTER;
use hoard_net::wire::CHANNEL_PERSIST;
use hoard_net::wire::CHANNEL_PULL;
use hoard_pinset::PinSetError;
use hoard_pinset::PinSetStore;
use hoard_pinset::PinnedSet;
use hoard_swarm::AskSwarm;
use hoard_swarm::MuxSwarm;
use hoard_swarm::PeerId;
use hoard_swarm::PeerRouter;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;

/// Errors surfaced by the node API.
#[derive(Debug, Snafu)]
pub enum NodeError {
    #[snafu(transparent)]
    Blob { source: BlobError },

    #[snafu(transparent)]
    PinSet { source: PinSetError },

    #[snafu(transparent)]
    Net { source: NetError },
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NodeError::Blob { source } if source.is_not_found()
        ) || matches!(self, NodeError::PinSet { source: PinSetError::NotFound })
    }
}

pub struct NodeParams {
    pub config: Config,
    pub db: Arc<redb::Database>,
    pub swarm: Arc<dyn AskSwarm>,
    pub signing_key: SigningKey,
}

/// One participant in the blob cache network.
pub struct Node {
    config: Config,
    data_store: Arc<RedbBlobStore>,
    pin_sets: Arc<PinSetStore>,
    peer_router: Arc<PeerRouter>,
    blob_router: Arc<BlobRouter>,
    crawler: Arc<Crawler>,
    pull: Arc<OneHopPull>,
    persist: Arc<PersistService>,
    cancel: CancellationToken,
}

impl Node {
    pub async fn new(params: NodeParams) -> Result<Arc<Self>, NodeError> {
        let config = params.config;
        let data_store = Arc::new(RedbBlobStore::new(params.db.clone())?);
        let metadata_store = Arc::new(RedbBlobStore::with_table(params.db.clone(), "metadata")?);
        let pin_sets = Arc::new(PinSetStore::new(params.db.clone())?);

        let local = params.swarm.local_id();
        let mux = MuxSwarm::new(params.swarm.clone());
        let peer_router = PeerRouter::new(params.swarm);

        let blob_router = BlobRouter::new(BlobRouterParams::new(mux.channel(CHANNEL_BLOB_ROUTER))).await?;
        // The routing trie is in-memory; republish the surviving pins so the
        // node advertises them again after a restart.
        let pinned = hoard_blobs::util::collect_ids(&PinnedSet::new(pin_sets.clone()), &[]).await?;
        for id in &pinned {
            blob_router.put(*id, local).await?;
        }
        let crawler = Crawler::new(CrawlerParams {
            peer_router: peer_router.clone(),
            blob_router: blob_router.clone(),
            interval: config.crawl_interval,
        });

        let pull = OneHopPull::new(mux.channel(CHANNEL_PULL), data_store.clone() as Arc<dyn BlobGet>);
        // Neighbors may always pull what this node publicly pins; everything
        // else needs a persistence-round rule.
        let rule_pin_sets = pin_sets.clone();
        pull.add_rule(Box::new(move |_peer, id| {
            rule_pin_sets.refcount(id).map(|count| count > 0).unwrap_or(false)
        }));

        let mut persist_params = PersistServiceParams::new(
            Arc::new(PinnedSet::new(pin_sets.clone())),
            data_store.clone(),
            metadata_store,
            pull.clone(),
            mux.channel(CHANNEL_PERSIST),
            params.db,
            params.signing_key,
        );
        persist_params.replicas = config.replicas;
        persist_params.peer_capacity = config.peer_capacity;
        let persist = PersistService::new(persist_params)?;

        info!(local = %local.fmt_short(), "node assembled");
        Ok(Arc::new(Node {
            config,
            data_store,
            pin_sets,
            peer_router,
            blob_router,
            crawler,
            pull,
            persist,
            cancel: CancellationToken::new(),
        }))
    }

    /// Starts the background services. Idempotent only across distinct
    /// nodes; call once.
    pub fn start(&self) {
        tokio::spawn(self.crawler.clone().run(self.cancel.child_token()));
    }

    /// Cancels the background services.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn local_id(&self) -> PeerId {
        self.blob_router.local_id()
    }

    pub fn max_blob_size(&self) -> usize {
        self.config.max_blob_size
    }

    pub fn pin_sets(&self) -> &Arc<PinSetStore> {
        &self.pin_sets
    }

    pub fn peer_router(&self) -> &Arc<PeerRouter> {
        &self.peer_router
    }

    pub fn blob_router(&self) -> &Arc<BlobRouter> {
        &self.blob_router
    }

    pub fn crawler(&self) -> &Arc<Crawler> {
        &self.crawler
    }

    pub fn persist_service(&self) -> &Arc<PersistService> {
        &self.persist
    }

    pub fn pull(&self) -> &Arc<OneHopPull> {
        &self.pull
    }

    /// Creates a pin set by name.
    pub fn create_pin_set(&self, name: &str) -> Result<hoard_pinset::PinSetId, NodeError> {
        Ok(self.pin_sets.create(name)?)
    }

    /// Deletes a pin set by name, releasing every member's refcount. Unknown
    /// names are a no-op.
    pub fn delete_pin_set(&self, name: &str) -> Result<(), NodeError> {
        if let Some(id) = self.pin_sets.resolve(name)? {
            self.pin_sets.delete(id)?;
        }
        Ok(())
    }

    /// Summarises a pin set.
    pub async fn get_pin_set(&self, name: &str) -> Result<hoard_pinset::PinSet, NodeError> {
        let id = self.pin_sets.resolve(name)?.ok_or(PinSetError::NotFound)?;
        Ok(self.pin_sets.get(id).await?)
    }

    /// Pins `id` into the named set and publishes the holding to the
    /// routing overlay.
    pub async fn pin(&self, name: &str, id: &BlobId) -> Result<(), NodeError> {
        let set = self.pin_sets.resolve(name)?.ok_or(PinSetError::NotFound)?;
        self.pin_sets.pin(set, id)?;
        self.blob_router.put(*id, self.local_id()).await?;
        Ok(())
    }

    /// Unpins `id` from the named set. The routing-overlay entry ages out on
    /// its own; there is no retraction protocol.
    pub fn unpin(&self, name: &str, id: &BlobId) -> Result<(), NodeError> {
        let set = self.pin_sets.resolve(name)?.ok_or(PinSetError::NotFound)?;
        self.pin_sets.unpin(set, id)?;
        Ok(())
    }

    /// Stores a blob, pinning it into the named set when one is given. An
    /// empty name stores without a pin, leaving the blob GC-eligible.
    pub async fn post(&self, pin_set: &str, data: &[u8]) -> Result<BlobId, NodeError> {
        if data.len() > self.config.max_blob_size {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.config.max_blob_size,
            }
            .into());
        }
        let id = self.data_store.post(data).await?;
        if !pin_set.is_empty() {
            self.pin(pin_set, &id).await?;
        }
        Ok(id)
    }

    /// Fetches a blob: locally when present, otherwise from the peers the
    /// router claims hold it, verifying and caching what arrives.
    pub async fn get(&self, id: &BlobId) -> Result<Bytes, NodeError> {
        match self.data_store.get(id).await {
            Ok(data) => return Ok(data),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let local = self.local_id();
        for peer in self.blob_router.who_has(id) {
            if peer == local {
                continue;
            }
            match self.pull.clone().getter(peer).get(id).await {
                Ok(data) => {
                    self.data_store.post(&data).await?;
                    debug!(id = %id.fmt_short(), peer = %peer.fmt_short(), "blob fetched from peer");
                    return Ok(data);
                }
                Err(e) => {
                    // Corrupt bytes are fatal for this pull only; the next
                    // candidate may still serve good ones.
                    warn!(id = %id.fmt_short(), peer = %peer.fmt_short(), error = %e, "pull failed");
                }
            }
        }
        Err(BlobError::NotFound { id: *id }.into())
    }

    pub async fn exists(&self, id: &BlobId) -> Result<bool, NodeError> {
        Ok(self.data_store.exists(id).await?)
    }

    /// Garbage-collects both stores: retained blobs are those with a live
    /// refcount or covered by a promise root.
    pub async fn gc(&self) -> Result<(), NodeError> {
        self.persist.gc().await?;
        Ok(())
    }
}
