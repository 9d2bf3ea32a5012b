//! The ask/tell swarm contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use snafu::Snafu;

use crate::peer::PeerId;

/// Errors from swarm operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SwarmError {
    /// The target peer is not reachable from this swarm.
    #[snafu(display("no route to peer {peer}"))]
    NoRouteToPeer { peer: PeerId },

    /// The ask was cancelled before a reply arrived.
    #[snafu(display("ask cancelled"))]
    Cancelled,

    /// Transport-level failure.
    #[snafu(display("transport error: {message}"))]
    Transport { message: String },
}

/// An inbound-ask handler: receives the authenticated source peer and the
/// payload, returns the reply bytes. An empty reply means the ask was not
/// satisfied.
pub type AskHandler = Arc<dyn Fn(PeerId, Bytes) -> BoxFuture<'static, Bytes> + Send + Sync>;

/// A secure ask/tell swarm.
///
/// Asks block the calling task until the peer replies or the transport fails;
/// inbound asks run concurrently through the registered handler.
#[async_trait]
pub trait AskSwarm: Send + Sync {
    /// This node's authenticated identity.
    fn local_id(&self) -> PeerId;

    /// Sends `payload` to `peer` and waits for its reply.
    async fn ask(&self, peer: &PeerId, payload: Bytes) -> Result<Bytes, SwarmError>;

    /// Installs the handler for inbound asks, replacing any previous one.
    fn on_ask(&self, handler: AskHandler);

    /// The directly connected peers.
    fn peers(&self) -> Vec<PeerId>;
}
