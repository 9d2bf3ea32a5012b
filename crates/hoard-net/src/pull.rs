//! One-hop pull: rule-gated byte transfer between neighbors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bytes::Bytes;
use hoard_blobs::BlobError;
use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_swarm::PeerId;
use hoard_swarm::SwarmChannel;
use hoard_swarm::SwarmError;
use parking_lot::RwLock;
use tracing::warn;

/// An access rule: may `peer` pull `blob` from this node?
pub type PullRule = Box<dyn Fn(&PeerId, &BlobId) -> bool + Send + Sync>;

/// Serves and issues single-blob pulls between direct neighbors.
///
/// The request is the raw 32-byte blob ID; the reply is the raw blob bytes,
/// empty when no rule admits the ask. Rules live behind a reader-writer lock
/// so concurrent asks proceed freely while rules are edited.
pub struct OneHopPull {
    channel: SwarmChannel,
    local: Arc<dyn BlobGet>,
    rules: RwLock<HashMap<u64, PullRule>>,
    seq: AtomicU64,
}

impl OneHopPull {
    pub fn new(channel: SwarmChannel, local: Arc<dyn BlobGet>) -> Arc<Self> {
        let pull = Arc::new(OneHopPull {
            channel: channel.clone(),
            local,
            rules: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        });

        // Weak: the channel must not keep the service alive.
        let handler = Arc::downgrade(&pull);
        channel.on_ask(Arc::new(move |from, payload| {
            let handler = handler.upgrade();
            Box::pin(async move {
                match handler {
                    Some(pull) => pull.handle_ask(from, payload).await,
                    None => Bytes::new(),
                }
            })
        }));
        pull
    }

    async fn handle_ask(&self, from: PeerId, payload: Bytes) -> Bytes {
        if payload.len() != 32 {
            return Bytes::new();
        }
        let id = BlobId::from_slice(&payload);
        if !self.is_allowed(&from, &id) {
            return Bytes::new();
        }
        match self.local.get(&id).await {
            Ok(data) => data,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(id = %id.fmt_short(), error = %e, "pull read failed");
                }
                Bytes::new()
            }
        }
    }

    fn is_allowed(&self, peer: &PeerId, id: &BlobId) -> bool {
        let rules = self.rules.read();
        rules.values().any(|rule| rule(peer, id))
    }

    /// Installs a rule and returns its handle.
    pub fn add_rule(&self, rule: PullRule) -> u64 {
        let handle = self.seq.fetch_add(1, Ordering::Relaxed);
        self.rules.write().insert(handle, rule);
        handle
    }

    /// Installs a rule scoped to one peer.
    pub fn allow_peer<F>(&self, peer: PeerId, f: F) -> u64
    where
        F: Fn(&BlobId) -> bool + Send + Sync + 'static,
    {
        self.add_rule(Box::new(move |p, id| *p == peer && f(id)))
    }

    pub fn drop_rule(&self, handle: u64) {
        self.rules.write().remove(&handle);
    }

    /// Pulls `id` from `peer`, returning exactly the bytes the peer wrote.
    /// The caller is responsible for hashing and verifying; an empty reply
    /// means the peer refused or lacks the blob.
    pub async fn pull(&self, peer: &PeerId, id: &BlobId) -> Result<Bytes, BlobError> {
        let reply = self
            .channel
            .ask(peer, id.as_bytes())
            .await
            .map_err(|e| match e {
                SwarmError::Cancelled => BlobError::Cancelled,
                other => BlobError::storage(other),
            })?;
        if reply.is_empty() {
            return Err(BlobError::NotFound { id: *id });
        }
        Ok(reply)
    }

    /// Presents `peer` as a blob getter. Fetched bytes are verified against
    /// the requested ID before they are handed out.
    pub fn getter(self: Arc<Self>, peer: PeerId) -> PullGetter {
        PullGetter { pull: self, peer }
    }
}

/// A remote peer viewed through the read capability.
#[derive(Clone)]
pub struct PullGetter {
    pull: Arc<OneHopPull>,
    peer: PeerId,
}

#[async_trait]
impl BlobGet for PullGetter {
    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        let data = self.pull.pull(&self.peer, id).await?;
        let got = hoard_blobs::hash(&data);
        if got != *id {
            return Err(BlobError::Corrupt { wanted: *id, got });
        }
        Ok(data)
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use hoard_blobs::BlobPost;
    use hoard_blobs::MemBlobStore;
    use hoard_swarm::AskSwarm;
    use hoard_swarm::MemRealm;
    use hoard_swarm::MuxSwarm;

    use super::*;
    use crate::wire::CHANNEL_PULL;

    struct Fixture {
        client: Arc<OneHopPull>,
        server: Arc<OneHopPull>,
        server_id: PeerId,
        client_id: PeerId,
        server_store: MemBlobStore,
    }

    async fn fixture() -> Fixture {
        let realm = MemRealm::new();
        let a = realm.swarm(SigningKey::from_bytes(&[1; 32]));
        let b = realm.swarm(SigningKey::from_bytes(&[2; 32]));
        a.add_peer(b.local_id());
        b.add_peer(a.local_id());
        let (client_id, server_id) = (a.local_id(), b.local_id());

        let mux_a = MuxSwarm::new(Arc::new(a));
        let mux_b = MuxSwarm::new(Arc::new(b));
        let client_store = MemBlobStore::new();
        let server_store = MemBlobStore::new();
        let client = OneHopPull::new(mux_a.channel(CHANNEL_PULL), Arc::new(client_store));
        let server = OneHopPull::new(mux_b.channel(CHANNEL_PULL), Arc::new(server_store.clone()));
        Fixture {
            client,
            server,
            server_id,
            client_id,
            server_store,
        }
    }

    #[tokio::test]
    async fn pull_is_gated_by_rules() {
        let f = fixture().await;
        let id = f.server_store.post(b"guarded bytes").await.unwrap();

        // No rules: refused, surfaced as not-found.
        let err = f.client.pull(&f.server_id, &id).await.unwrap_err();
        assert!(err.is_not_found());

        let rule = f.server.allow_peer(f.client_id, |_| true);
        let data = f.client.pull(&f.server_id, &id).await.unwrap();
        assert_eq!(data.as_ref(), b"guarded bytes");

        f.server.drop_rule(rule);
        let err = f.client.pull(&f.server_id, &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rules_scope_to_peer_and_blob() {
        let f = fixture().await;
        let allowed = f.server_store.post(b"allowed").await.unwrap();
        let denied = f.server_store.post(b"denied").await.unwrap();

        f.server.allow_peer(f.client_id, move |id| *id == allowed);
        assert!(f.client.pull(&f.server_id, &allowed).await.is_ok());
        assert!(f.client.pull(&f.server_id, &denied).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn getter_verifies_hashes() {
        let f = fixture().await;
        let id = f.server_store.post(b"verified").await.unwrap();
        f.server.allow_peer(f.client_id, |_| true);

        let getter = f.client.clone().getter(f.server_id);
        assert_eq!(getter.get(&id).await.unwrap().as_ref(), b"verified");
        assert!(getter.exists(&id).await.unwrap());
        assert!(!getter.exists(&hoard_blobs::hash(b"absent")).await.unwrap());
    }
}
