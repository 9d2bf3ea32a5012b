//! A peer-to-peer, content-addressed blob cache node.
//!
//! Each node stores opaque blobs addressed by their BLAKE3 hash, exposes
//! named pin sets expressing what the local user wants retained, and
//! cooperates with peers to locate blobs and replicate pin sets:
//!
//! ```text
//! client ──> Node ──> PinSetStore ──(refcounts)──> local data store
//!              │
//!              ├──> BlobRouter ── kad table + published routing trie
//!              │        ▲
//!              │        └── Crawler (walks peers' tries each tick)
//!              ├──> OneHopPull (rule-gated byte transfer)
//!              └──> PersistService (plans, promises, sync, GC)
//! ```
//!
//! A local `get` miss consults the router for candidate holders, pulls the
//! bytes from a neighbor, verifies them against the requested ID, and caches
//! them locally.

pub mod config;
pub mod node;
pub mod server;

pub use config::Config;
pub use config::ConfigError;
pub use node::Node;
pub use node::NodeError;
pub use node::NodeParams;
