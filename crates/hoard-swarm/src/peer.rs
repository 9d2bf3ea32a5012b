//! Peer identities.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use serde::Serialize;

/// A peer's identity: the BLAKE3 hash of its long-term public key.
///
/// Knowing a `PeerId` is enough to verify a key a peer presents; the swarm
/// authenticates the key during the handshake, so an ask's source identity
/// can be trusted by handlers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        let mut id = [0u8; 32];
        let n = slice.len().min(32);
        id[..n].copy_from_slice(&slice[..n]);
        PeerId(id)
    }

    pub fn fmt_short(&self) -> String {
        let mut s = String::with_capacity(10);
        for b in &self.0[..5] {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

/// Derives the peer ID bound to a public key.
pub fn peer_id_from_key(key: &VerifyingKey) -> PeerId {
    PeerId(*blake3::hash(key.as_bytes()).as_bytes())
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.fmt_short())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    #[test]
    fn id_is_bound_to_key() {
        let a = SigningKey::from_bytes(&[1u8; 32]);
        let b = SigningKey::from_bytes(&[2u8; 32]);
        assert_eq!(peer_id_from_key(&a.verifying_key()), peer_id_from_key(&a.verifying_key()));
        assert_ne!(peer_id_from_key(&a.verifying_key()), peer_id_from_key(&b.verifying_key()));
    }
}
