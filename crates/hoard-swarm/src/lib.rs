//! The peer swarm abstraction.
//!
//! The wider system only assumes an *ask/tell* message layer with
//! authenticated peer identities: an ask carries an opaque payload to a named
//! peer and blocks for that peer's reply. This crate defines the [`AskSwarm`]
//! contract, a channel-tag demultiplexer so several services can share one
//! swarm, an in-process realm used by multi-node tests, and the peer router
//! that tracks one-hop neighbors and multi-hop routing tags.
//!
//! A secure transport (QUIC, an overlay, anything that authenticates the
//! remote key) slots in by implementing [`AskSwarm`]; nothing above this
//! crate knows which transport is in play.

mod mem;
mod mux;
mod peer;
mod router;
mod swarm;

pub use mem::MemRealm;
pub use mem::MemSwarm;
pub use mux::MuxSwarm;
pub use mux::SwarmChannel;
pub use peer::PeerId;
pub use peer::peer_id_from_key;
pub use router::PeerRouter;
pub use router::Route;
pub use swarm::AskHandler;
pub use swarm::AskSwarm;
pub use swarm::SwarmError;
