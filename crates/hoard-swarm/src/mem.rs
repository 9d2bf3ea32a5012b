//! In-process swarm realm for multi-node tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;

use crate::peer::PeerId;
use crate::peer::peer_id_from_key;
use crate::swarm::AskHandler;
use crate::swarm::AskSwarm;
use crate::swarm::SwarmError;

struct Registration {
    handler: RwLock<Option<AskHandler>>,
    key: VerifyingKey,
}

#[derive(Default)]
struct RealmInner {
    swarms: RwLock<HashMap<PeerId, Arc<Registration>>>,
}

/// A realm of in-process swarms: every swarm created from the same realm can
/// ask every other, subject to its adjacency set. Delivery is a direct
/// function call on the target's handler, which keeps multi-node tests fast
/// and deterministic.
#[derive(Clone, Default)]
pub struct MemRealm {
    inner: Arc<RealmInner>,
}

impl MemRealm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a swarm for `key` and registers it in the realm. The swarm
    /// starts with no neighbors; see [`MemSwarm::add_peer`].
    pub fn swarm(&self, key: SigningKey) -> MemSwarm {
        let local = peer_id_from_key(&key.verifying_key());
        let registration = Arc::new(Registration {
            handler: RwLock::new(None),
            key: key.verifying_key(),
        });
        self.inner.swarms.write().insert(local, registration);
        MemSwarm {
            realm: self.clone(),
            local,
            neighbors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Looks up the public key a peer registered with.
    pub fn lookup_key(&self, peer: &PeerId) -> Option<VerifyingKey> {
        self.inner.swarms.read().get(peer).map(|r| r.key)
    }
}

/// One node's endpoint in a [`MemRealm`].
#[derive(Clone)]
pub struct MemSwarm {
    realm: MemRealm,
    local: PeerId,
    neighbors: Arc<RwLock<Vec<PeerId>>>,
}

impl MemSwarm {
    /// Adds a directly connected neighbor.
    pub fn add_peer(&self, peer: PeerId) {
        let mut neighbors = self.neighbors.write();
        if !neighbors.contains(&peer) {
            neighbors.push(peer);
        }
    }
}

#[async_trait]
impl AskSwarm for MemSwarm {
    fn local_id(&self) -> PeerId {
        self.local
    }

    async fn ask(&self, peer: &PeerId, payload: Bytes) -> Result<Bytes, SwarmError> {
        if !self.neighbors.read().contains(peer) {
            return Err(SwarmError::NoRouteToPeer { peer: *peer });
        }
        let registration = self
            .realm
            .inner
            .swarms
            .read()
            .get(peer)
            .cloned()
            .ok_or(SwarmError::NoRouteToPeer { peer: *peer })?;
        let handler = registration.handler.read().clone();
        match handler {
            Some(handler) => Ok(handler(self.local, payload).await),
            // A peer with no handler installed satisfies nothing.
            None => Ok(Bytes::new()),
        }
    }

    fn on_ask(&self, handler: AskHandler) {
        if let Some(registration) = self.realm.inner.swarms.read().get(&self.local) {
            *registration.handler.write() = Some(handler);
        }
    }

    fn peers(&self) -> Vec<PeerId> {
        self.neighbors.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[tokio::test]
    async fn ask_round_trips_between_neighbors() {
        let realm = MemRealm::new();
        let a = realm.swarm(key(1));
        let b = realm.swarm(key(2));
        a.add_peer(b.local_id());
        b.add_peer(a.local_id());

        let a_id = a.local_id();
        b.on_ask(Arc::new(move |from, payload| {
            assert_eq!(from, a_id);
            Box::pin(async move {
                let mut reply = b"echo:".to_vec();
                reply.extend_from_slice(&payload);
                Bytes::from(reply)
            })
        }));

        let reply = a.ask(&b.local_id(), Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(reply.as_ref(), b"echo:hi");
    }

    #[tokio::test]
    async fn ask_to_non_neighbor_fails() {
        let realm = MemRealm::new();
        let a = realm.swarm(key(1));
        let b = realm.swarm(key(2));
        let err = a.ask(&b.local_id(), Bytes::new()).await.unwrap_err();
        assert!(matches!(err, SwarmError::NoRouteToPeer { .. }));
    }
}
