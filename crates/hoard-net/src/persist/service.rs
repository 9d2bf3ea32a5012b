//! The persistence service: promise negotiation, trie pulls, and GC.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ed25519_dalek::SigningKey;
use hoard_blobs::BlobId;
use hoard_blobs::BlobSet;
use hoard_blobs::BlobStore;
use hoard_blobs::util;
use hoard_swarm::PeerId;
use hoard_swarm::SwarmChannel;
use redb::ReadableTable;
use redb::TableDefinition;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::NetError;
use crate::persist::placer::PEER_CAPACITY;
use crate::persist::placer::Placer;
use crate::persist::placer::Plan;
use crate::persist::placer::REPLICAS;
use crate::persist::sets::TrieSet;
use crate::persist::sets::Union;
use crate::pull::OneHopPull;
use crate::wire;
use crate::wire::PersistReq;
use crate::wire::Promise;

/// Replication promises this node has issued, keyed by the peer whose data
/// it hosts.
const PROMISES_FROM_US: TableDefinition<&[u8], &[u8]> = TableDefinition::new("promisesFromUs");
/// Promises peers have issued to this node, keyed by the promising peer.
const PROMISES_TO_US: TableDefinition<&[u8], &[u8]> = TableDefinition::new("promisesToUs");

/// Default promise lifetime.
pub const PROMISE_TTL: Duration = Duration::from_secs(24 * 3600);

pub struct PersistServiceParams {
    /// The set of blob IDs the local node wants replicated.
    pub local_set: Arc<dyn BlobSet>,
    /// Where blob bytes live.
    pub data_store: Arc<dyn BlobStore>,
    /// Where trie nodes live.
    pub metadata_store: Arc<dyn BlobStore>,
    pub puller: Arc<OneHopPull>,
    pub channel: SwarmChannel,
    pub db: Arc<redb::Database>,
    pub signing_key: SigningKey,
    pub replicas: usize,
    pub peer_capacity: u64,
    pub promise_ttl: Duration,
}

impl PersistServiceParams {
    pub fn new(
        local_set: Arc<dyn BlobSet>,
        data_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn BlobStore>,
        puller: Arc<OneHopPull>,
        channel: SwarmChannel,
        db: Arc<redb::Database>,
        signing_key: SigningKey,
    ) -> Self {
        PersistServiceParams {
            local_set,
            data_store,
            metadata_store,
            puller,
            channel,
            db,
            signing_key,
            replicas: REPLICAS,
            peer_capacity: PEER_CAPACITY,
            promise_ttl: PROMISE_TTL,
        }
    }
}

/// Negotiates replication with peers and keeps the durable record of what
/// was agreed.
///
/// Outbound: `make_plan` assigns the local set to replica peers, `persist`
/// runs one promise round with a peer from the current plan. Inbound: a
/// `PersistReq` is answered by pulling the offered trie and issuing a signed
/// promise.
///
/// `gc_lock` orders pulls against GC: a pull in flight holds the shared
/// side, a sweep the exclusive side, so a sweep never deletes blobs a
/// concurrent pull is writing.
pub struct PersistService {
    local: PeerId,
    local_set: Arc<dyn BlobSet>,
    data_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn BlobStore>,
    puller: Arc<OneHopPull>,
    channel: SwarmChannel,
    placer: Placer<Arc<dyn BlobStore>>,
    plan: Mutex<Option<Plan>>,
    db: Arc<redb::Database>,
    signing_key: SigningKey,
    peer_capacity: u64,
    promise_ttl: Duration,
    gc_lock: RwLock<()>,
}

impl PersistService {
    pub fn new(params: PersistServiceParams) -> Result<Arc<Self>, NetError> {
        let tx = params.db.begin_write().map_err(NetError::storage)?;
        tx.open_table(PROMISES_FROM_US).map_err(NetError::storage)?;
        tx.open_table(PROMISES_TO_US).map_err(NetError::storage)?;
        tx.commit().map_err(NetError::storage)?;

        let local = params.channel.local_id();
        let placer = Placer::new(
            params.metadata_store.clone(),
            params.replicas,
            Placer::<Arc<dyn BlobStore>>::kad_costs(local),
            Placer::<Arc<dyn BlobStore>>::flat_capacity(params.peer_capacity),
        );

        let service = Arc::new(PersistService {
            local,
            local_set: params.local_set,
            data_store: params.data_store,
            metadata_store: params.metadata_store,
            puller: params.puller,
            channel: params.channel.clone(),
            placer,
            plan: Mutex::new(None),
            db: params.db,
            signing_key: params.signing_key,
            peer_capacity: params.peer_capacity,
            promise_ttl: params.promise_ttl,
            gc_lock: RwLock::new(()),
        });

        // Weak: the channel must not keep the service alive.
        let handler = Arc::downgrade(&service);
        params.channel.on_ask(Arc::new(move |from, payload| {
            let handler = handler.upgrade();
            Box::pin(async move {
                match handler {
                    Some(service) => service.handle_ask(from, payload).await,
                    None => Bytes::new(),
                }
            })
        }));
        Ok(service)
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Builds and remembers the current plan for `peers`.
    pub async fn make_plan(&self, peers: &[PeerId]) -> Result<Plan, NetError> {
        let plan = self.placer.make_plan(peers, self.local_set.as_ref()).await?;
        *self.plan.lock().await = Some(plan.clone());
        Ok(plan)
    }

    /// Runs one promise round with `peer` using its placement from the
    /// current plan: opens a pull window for the peer, asks it to persist
    /// the placement root, and verifies and records the returned promise.
    pub async fn persist(&self, peer: &PeerId) -> Result<Promise, NetError> {
        let placement = {
            let plan = self.plan.lock().await;
            plan.as_ref()
                .and_then(|p| p.placements.get(peer).cloned())
                .ok_or(NetError::NoPlacement { peer: *peer })?
        };

        // The peer will pull the placement trie and its members; admit
        // exactly that closure for the duration of the round.
        let allowed = self.placement_closure(&placement.root).await?;
        let target = *peer;
        let rule = self
            .puller
            .add_rule(Box::new(move |p, id| *p == target && allowed.contains(id)));

        let result = self.persist_round(peer, &placement).await;
        self.puller.drop_rule(rule);
        result
    }

    async fn persist_round(
        &self,
        peer: &PeerId,
        placement: &crate::persist::placer::Placement,
    ) -> Result<Promise, NetError> {
        let req = PersistReq {
            root: placement.root,
            count: placement.count,
        };
        let reply = self.channel.ask(peer, &wire::encode(&req)?).await?;
        if reply.is_empty() {
            return Err(NetError::BadPromise {
                peer: *peer,
                reason: "peer refused to persist".to_string(),
            });
        }
        let promise: Promise = wire::decode(&reply)?;
        if !promise.verify() {
            return Err(NetError::BadPromise {
                peer: *peer,
                reason: "signature verification failed".to_string(),
            });
        }
        if promise.peer_id != *peer {
            return Err(NetError::BadPromise {
                peer: *peer,
                reason: "promise names a different peer".to_string(),
            });
        }
        if promise.root != placement.root {
            return Err(NetError::BadPromise {
                peer: *peer,
                reason: "promise names a different root".to_string(),
            });
        }
        self.record_promise(PROMISES_TO_US, peer, &promise)?;
        info!(peer = %peer.fmt_short(), root = %promise.root.fmt_short(), "promise received");
        Ok(promise)
    }

    /// Every blob ID a peer needs to replicate `root`: the trie nodes plus
    /// the member IDs they enumerate.
    async fn placement_closure(&self, root: &BlobId) -> Result<HashSet<BlobId>, NetError> {
        let mut allowed: HashSet<BlobId> = hoard_tries::reachable(&self.metadata_store, &[*root]).await?;
        let trie_set = TrieSet::with_root(self.metadata_store.clone(), *root);
        for id in util::collect_ids(&trie_set, &[]).await? {
            allowed.insert(id);
        }
        Ok(allowed)
    }

    async fn handle_ask(&self, from: PeerId, payload: Bytes) -> Bytes {
        let req: PersistReq = match wire::decode(&payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(from = %from.fmt_short(), error = %e, "bad persist request");
                return Bytes::new();
            }
        };
        match self.handle_persist_req(from, req).await {
            Ok(promise) => match wire::encode(&promise) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!(error = %e, "promise failed to encode");
                    Bytes::new()
                }
            },
            Err(e) => {
                debug!(from = %from.fmt_short(), error = %e, "persist request refused");
                Bytes::new()
            }
        }
    }

    async fn handle_persist_req(&self, from: PeerId, req: PersistReq) -> Result<Promise, NetError> {
        if req.count > self.peer_capacity {
            return Err(NetError::Full);
        }
        self.pull_trie(&from, req.root).await?;
        let promise = Promise::sign(&self.signing_key, req.root, self.promise_ttl);
        self.record_promise(PROMISES_FROM_US, &from, &promise)?;
        info!(peer = %from.fmt_short(), root = %req.root.fmt_short(), count = req.count, "promise issued");
        Ok(promise)
    }

    /// Copies a peer's placement onto this node: the metadata trie first,
    /// then every data blob it enumerates. Holds the shared side of
    /// `gc_lock` throughout so a concurrent sweep cannot delete what is
    /// being written.
    pub async fn pull_trie(&self, peer: &PeerId, root: BlobId) -> Result<(), NetError> {
        let _hold = self.gc_lock.read().await;
        let src = self.puller.clone().getter(*peer);
        hoard_tries::sync(&src, &self.metadata_store, root).await?;

        let trie_set = TrieSet::with_root(self.metadata_store.clone(), root);
        for id in util::collect_ids(&trie_set, &[]).await? {
            if self.data_store.exists(&id).await? {
                continue;
            }
            util::copy(&src, &self.data_store, &id).await?;
        }
        Ok(())
    }

    /// Garbage-collects both stores under the exclusive side of `gc_lock`.
    ///
    /// The metadata keep-set is every root referenced by a promise this node
    /// issued plus the current plan's placement roots; the data keep-set is
    /// the union of those sets' members and the local pin set.
    pub async fn gc(&self) -> Result<(), NetError> {
        let _hold = self.gc_lock.write().await;

        let mut roots: Vec<BlobId> = self.promises_from_us()?.into_iter().map(|p| p.root).collect();
        if let Some(plan) = self.plan.lock().await.as_ref() {
            for placement in plan.placements.values() {
                if placement.count > 0 {
                    roots.push(placement.root);
                }
            }
        }
        roots.sort();
        roots.dedup();

        let swept = hoard_tries::gc(&self.metadata_store, &roots).await?;
        debug!(roots = roots.len(), swept, "metadata store collected");

        let mut keep: Vec<Arc<dyn BlobSet>> = vec![self.local_set.clone()];
        for root in roots {
            keep.push(Arc::new(TrieSet::with_root(self.metadata_store.clone(), root)));
        }
        let swept = util::gc(self.data_store.as_ref(), &[], &Union(keep)).await?;
        debug!(swept, "data store collected");
        Ok(())
    }

    fn record_promise(
        &self,
        table: TableDefinition<&'static [u8], &'static [u8]>,
        peer: &PeerId,
        promise: &Promise,
    ) -> Result<(), NetError> {
        let encoded = wire::encode(promise)?;
        let tx = self.db.begin_write().map_err(NetError::storage)?;
        {
            let mut table = tx.open_table(table).map_err(NetError::storage)?;
            table
                .insert(peer.as_bytes().as_slice(), encoded.as_slice())
                .map_err(NetError::storage)?;
        }
        tx.commit().map_err(NetError::storage)?;
        Ok(())
    }

    fn load_promises(&self, table: TableDefinition<&'static [u8], &'static [u8]>) -> Result<Vec<Promise>, NetError> {
        let tx = self.db.begin_read().map_err(NetError::storage)?;
        let table = tx.open_table(table).map_err(NetError::storage)?;
        let mut promises = Vec::new();
        for item in table.iter().map_err(NetError::storage)? {
            let (_, value) = item.map_err(NetError::storage)?;
            promises.push(wire::decode(value.value())?);
        }
        Ok(promises)
    }

    /// The promises this node has issued: the sets it hosts for peers.
    pub fn promises_from_us(&self) -> Result<Vec<Promise>, NetError> {
        self.load_promises(PROMISES_FROM_US)
    }

    /// The promises peers have issued to this node.
    pub fn promises_to_us(&self) -> Result<Vec<Promise>, NetError> {
        self.load_promises(PROMISES_TO_US)
    }
}

#[cfg(test)]
mod tests {
    use hoard_blobs::BlobGet;
    use hoard_blobs::BlobPost;
    use hoard_blobs::MemBlobStore;
    use hoard_swarm::AskSwarm;
    use hoard_swarm::MemRealm;
    use hoard_swarm::MuxSwarm;
    use redb::backends::InMemoryBackend;

    use super::*;
    use crate::wire::CHANNEL_PERSIST;
    use crate::wire::CHANNEL_PULL;

    #[tokio::test]
    async fn persist_round_replicates_and_promises() {
        let realm = MemRealm::new();
        let key_a = SigningKey::from_bytes(&[1u8; 32]);
        let key_b = SigningKey::from_bytes(&[2u8; 32]);
        let swarm_a = realm.swarm(key_a.clone());
        let swarm_b = realm.swarm(key_b.clone());
        swarm_a.add_peer(swarm_b.local_id());
        swarm_b.add_peer(swarm_a.local_id());
        let (a_id, b_id) = (swarm_a.local_id(), swarm_b.local_id());

        let mux_a = MuxSwarm::new(Arc::new(swarm_a));
        let mux_b = MuxSwarm::new(Arc::new(swarm_b));

        let data_a = MemBlobStore::new();
        let metadata_a = MemBlobStore::new();
        let mut local_set_a = TrieSet::new(metadata_a.clone()).await.unwrap();
        let mut blobs = Vec::new();
        for i in 0u32..5 {
            let id = data_a.post(format!("payload-{i}").as_bytes()).await.unwrap();
            local_set_a.add(&id).await.unwrap();
            blobs.push(id);
        }
        let puller_a = OneHopPull::new(mux_a.channel(CHANNEL_PULL), Arc::new(data_a.clone()));
        let db_a = Arc::new(
            redb::Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .unwrap(),
        );
        let service_a = PersistService::new(PersistServiceParams::new(
            Arc::new(local_set_a),
            Arc::new(data_a.clone()),
            Arc::new(metadata_a),
            puller_a,
            mux_a.channel(CHANNEL_PERSIST),
            db_a,
            key_a,
        ))
        .unwrap();

        let data_b = MemBlobStore::new();
        let metadata_b = MemBlobStore::new();
        let local_set_b = TrieSet::new(metadata_b.clone()).await.unwrap();
        let puller_b = OneHopPull::new(mux_b.channel(CHANNEL_PULL), Arc::new(data_b.clone()));
        let db_b = Arc::new(
            redb::Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .unwrap(),
        );
        let service_b = PersistService::new(PersistServiceParams::new(
            Arc::new(local_set_b),
            Arc::new(data_b.clone()),
            Arc::new(metadata_b.clone()),
            puller_b,
            mux_b.channel(CHANNEL_PERSIST),
            db_b,
            key_b,
        ))
        .unwrap();

        let plan = service_a.make_plan(&[b_id]).await.unwrap();
        assert_eq!(plan.placements[&b_id].count, 5);

        let promise = service_a.persist(&b_id).await.unwrap();
        assert!(promise.verify());
        assert_eq!(promise.peer_id, b_id);
        assert_eq!(promise.root, plan.placements[&b_id].root);

        // The replica now holds every data blob.
        for id in &blobs {
            assert!(data_b.exists(id).await.unwrap());
        }

        // Both sides recorded the agreement.
        assert_eq!(service_a.promises_to_us().unwrap().len(), 1);
        assert_eq!(service_b.promises_from_us().unwrap().len(), 1);

        // A sweep on the replica keeps everything it promised to host.
        service_b.gc().await.unwrap();
        for id in &blobs {
            assert!(data_b.exists(id).await.unwrap());
        }
        // The promised trie still walks on the replica's metadata store.
        let hosted = TrieSet::with_root(metadata_b, promise.root);
        for id in &blobs {
            assert!(hosted.contains(id).await.unwrap());
        }
        let _ = a_id;
    }
}
