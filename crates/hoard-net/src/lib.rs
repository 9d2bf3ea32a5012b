//! The blob-routing overlay.
//!
//! Four cooperating services run over the shared ask/tell swarm:
//!
//! - the **blob router** keeps a Kademlia table mapping blob IDs to the peers
//!   that hold them and serves shard listings of the local routing trie
//! - the **crawler** periodically walks peers' published tries and feeds the
//!   router, skipping shards whose hash has not changed
//! - **one-hop pull** is the rule-gated byte transfer between neighbors
//! - the **persistence service** places the local pin superset onto replica
//!   peers, exchanges signed promises, and garbage-collects stores against
//!   the promised roots
//!
//! Sync and GC are mutually exclusive through the service's `gc_lock`: pulls
//! hold the shared side, a GC sweep the exclusive side. Without it a sync
//! could re-write a blob the sweep has already decided to delete.

pub mod bitstrings;
pub mod crawler;
mod error;
pub mod kad;
pub mod persist;
pub mod pull;
pub mod router;
pub mod wire;

pub use crawler::Crawler;
pub use crawler::CrawlerParams;
pub use error::NetError;
pub use kad::KadRoutingTable;
pub use persist::Placement;
pub use persist::Placer;
pub use persist::Plan;
pub use persist::PersistService;
pub use persist::PersistServiceParams;
pub use persist::TrieSet;
pub use persist::Union;
pub use pull::OneHopPull;
pub use pull::PullGetter;
pub use router::BlobRouter;
pub use router::BlobRouterParams;
