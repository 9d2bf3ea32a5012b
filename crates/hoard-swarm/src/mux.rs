//! Channel demultiplexing over one swarm.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use bytes::BytesMut;
use parking_lot::RwLock;
use tracing::warn;

use crate::peer::PeerId;
use crate::swarm::AskHandler;
use crate::swarm::AskSwarm;
use crate::swarm::SwarmError;

/// Demultiplexes several services over a single [`AskSwarm`] by prefixing
/// every payload with a one-byte channel tag. Each service takes a
/// [`SwarmChannel`] and installs its own handler; inbound asks are dispatched
/// by tag.
pub struct MuxSwarm {
    swarm: Arc<dyn AskSwarm>,
    handlers: Arc<RwLock<HashMap<u8, AskHandler>>>,
}

impl MuxSwarm {
    pub fn new(swarm: Arc<dyn AskSwarm>) -> Arc<Self> {
        let handlers: Arc<RwLock<HashMap<u8, AskHandler>>> = Arc::default();
        let dispatch = handlers.clone();
        swarm.on_ask(Arc::new(move |from, payload| {
            let handler = payload.first().and_then(|tag| dispatch.read().get(tag).cloned());
            match handler {
                Some(handler) => handler(from, payload.slice(1..)),
                None => {
                    warn!(from = %from.fmt_short(), "ask on unknown channel");
                    Box::pin(async { Bytes::new() })
                }
            }
        }));
        Arc::new(MuxSwarm { swarm, handlers })
    }

    pub fn local_id(&self) -> PeerId {
        self.swarm.local_id()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.swarm.peers()
    }

    /// Opens the channel with the given tag.
    pub fn channel(&self, tag: u8) -> SwarmChannel {
        SwarmChannel {
            swarm: self.swarm.clone(),
            handlers: self.handlers.clone(),
            tag,
        }
    }
}

/// One service's view of the shared swarm.
#[derive(Clone)]
pub struct SwarmChannel {
    swarm: Arc<dyn AskSwarm>,
    handlers: Arc<RwLock<HashMap<u8, AskHandler>>>,
    tag: u8,
}

impl SwarmChannel {
    pub fn local_id(&self) -> PeerId {
        self.swarm.local_id()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.swarm.peers()
    }

    /// Asks `peer` on this channel.
    pub async fn ask(&self, peer: &PeerId, payload: &[u8]) -> Result<Bytes, SwarmError> {
        let mut framed = BytesMut::with_capacity(payload.len() + 1);
        framed.extend_from_slice(&[self.tag]);
        framed.extend_from_slice(payload);
        self.swarm.ask(peer, framed.freeze()).await
    }

    /// Installs this channel's inbound handler.
    pub fn on_ask(&self, handler: AskHandler) {
        self.handlers.write().insert(self.tag, handler);
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::mem::MemRealm;

    #[tokio::test]
    async fn channels_are_independent() {
        let realm = MemRealm::new();
        let a = realm.swarm(SigningKey::from_bytes(&[1; 32]));
        let b = realm.swarm(SigningKey::from_bytes(&[2; 32]));
        a.add_peer(b.local_id());
        b.add_peer(a.local_id());

        let mux_a = MuxSwarm::new(Arc::new(a));
        let mux_b = MuxSwarm::new(Arc::new(b.clone()));

        mux_b
            .channel(1)
            .on_ask(Arc::new(|_, _| Box::pin(async { Bytes::from_static(b"one") })));
        mux_b
            .channel(2)
            .on_ask(Arc::new(|_, _| Box::pin(async { Bytes::from_static(b"two") })));

        let ch1 = mux_a.channel(1);
        let ch2 = mux_a.channel(2);
        let ch9 = mux_a.channel(9);
        assert_eq!(ch1.ask(&b.local_id(), b"x").await.unwrap().as_ref(), b"one");
        assert_eq!(ch2.ask(&b.local_id(), b"x").await.unwrap().as_ref(), b"two");
        // Unknown channels answer empty: not satisfied.
        assert!(ch9.ask(&b.local_id(), b"x").await.unwrap().is_empty());
    }
}
