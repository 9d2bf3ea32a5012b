//! Peer routing: one-hop neighbors and multi-hop routing tags.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::peer::PeerId;
use crate::swarm::AskSwarm;

/// A learned route to a peer that is not a direct neighbor: the neighbor to
/// forward through and the opaque tag that neighbor needs to deliver the
/// message onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub next_hop: PeerId,
    pub tag: Vec<u8>,
}

/// Tracks how to reach peers: direct neighbors come from the swarm, multi-hop
/// routes are learned from the routing protocol and registered with
/// [`PeerRouter::add_route`].
pub struct PeerRouter {
    swarm: Arc<dyn AskSwarm>,
    routes: RwLock<HashMap<PeerId, Route>>,
}

impl PeerRouter {
    pub fn new(swarm: Arc<dyn AskSwarm>) -> Arc<Self> {
        Arc::new(PeerRouter {
            swarm,
            routes: RwLock::new(HashMap::new()),
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.swarm.local_id()
    }

    /// The directly connected peers.
    pub fn one_hop(&self) -> Vec<PeerId> {
        self.swarm.peers()
    }

    /// Peers known only through multi-hop routes.
    pub fn multi_hop(&self) -> Vec<PeerId> {
        let one_hop = self.swarm.peers();
        self.routes
            .read()
            .keys()
            .filter(|peer| !one_hop.contains(peer))
            .copied()
            .collect()
    }

    /// Registers a learned multi-hop route.
    pub fn add_route(&self, peer: PeerId, route: Route) {
        self.routes.write().insert(peer, route);
    }

    pub fn drop_route(&self, peer: &PeerId) {
        self.routes.write().remove(peer);
    }

    /// Resolves the routing tag and next hop for `peer`. A direct neighbor
    /// routes to itself with its own ID as the tag; otherwise a learned route
    /// is used. `None` means no route is known.
    pub fn lookup(&self, peer: &PeerId) -> Option<(Vec<u8>, PeerId)> {
        if self.swarm.peers().contains(peer) {
            return Some((peer.as_bytes().to_vec(), *peer));
        }
        self.routes.read().get(peer).map(|r| (r.tag.clone(), r.next_hop))
    }
}
