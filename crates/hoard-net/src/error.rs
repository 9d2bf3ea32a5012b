//! Overlay error types.

use hoard_blobs::BlobError;
use hoard_swarm::PeerId;
use hoard_swarm::SwarmError;
use hoard_tries::TrieError;
use snafu::Snafu;

/// Errors from the routing overlay and persistence service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NetError {
    /// A kad bucket is at capacity; the entry was not stored. Callers skip
    /// and move on.
    #[snafu(display("bucket at capacity, entry not stored"))]
    ShouldEvictThis,

    /// No route is known for the peer.
    #[snafu(display("no route to peer {peer}"))]
    NoRouteToPeer { peer: PeerId },

    /// Not enough peers with remaining capacity to place every replica.
    #[snafu(display("placement failed: not enough peers with capacity"))]
    Full,

    /// The current plan has no placement for the peer.
    #[snafu(display("plan has no placement for peer {peer}"))]
    NoPlacement { peer: PeerId },

    /// A wire message failed to encode or decode.
    #[snafu(display("message codec failure: {message}"))]
    Codec { message: String },

    /// A peer's promise failed verification or the peer refused to promise.
    #[snafu(display("bad promise from {peer}: {reason}"))]
    BadPromise { peer: PeerId, reason: String },

    /// Promise bookkeeping failure in the local database.
    #[snafu(display("promise storage failure: {message}"))]
    Storage { message: String },

    #[snafu(transparent)]
    Swarm { source: SwarmError },

    #[snafu(transparent)]
    Blob { source: BlobError },

    #[snafu(transparent)]
    Trie { source: TrieError },
}

impl NetError {
    pub fn storage(e: impl std::fmt::Display) -> Self {
        NetError::Storage { message: e.to_string() }
    }
}
