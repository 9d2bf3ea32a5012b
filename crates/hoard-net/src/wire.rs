//! Wire messages carried in ask payloads.
//!
//! Every message is a postcard-encoded struct; the ask framing already
//! delimits messages, and an empty payload always means "not satisfied".
//! Channel tags demultiplex the services sharing the swarm.

use std::time::Duration;
use std::time::SystemTime;

use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;
use hoard_blobs::BlobId;
use hoard_swarm::PeerId;
use hoard_swarm::peer_id_from_key;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::NetError;

/// Channel tag for shard listing requests.
pub const CHANNEL_BLOB_ROUTER: u8 = 1;
/// Channel tag for one-hop pulls.
pub const CHANNEL_PULL: u8 = 2;
/// Channel tag for persistence negotiation.
pub const CHANNEL_PERSIST: u8 = 3;

/// Asks a peer for the topmost trie node of its pin superset under `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBlobsReq {
    pub routing_tag: Vec<u8>,
    pub prefix: Vec<u8>,
}

/// Reply to [`ListBlobsReq`]. Empty `trie_data` signals "please shard":
/// the node under that prefix is too large to return whole and the caller
/// should recurse into narrower prefixes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBlobsRes {
    pub trie_hash: Vec<u8>,
    pub trie_data: Vec<u8>,
}

/// Asks a peer to persist the set summarised by a trie root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistReq {
    pub root: BlobId,
    pub count: u64,
}

/// A signed commitment by a peer to retain a trie root until an expiry.
///
/// The promise carries the promising peer's verifying key and is
/// self-certifying: the key must hash to `peer_id`, so a verifier needs no
/// out-of-band key lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promise {
    pub peer_id: PeerId,
    pub root: BlobId,
    pub expires_at: u64,
    pub verifying_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl Promise {
    fn signable(peer_id: &PeerId, root: &BlobId, expires_at: u64) -> Vec<u8> {
        let mut msg = Vec::with_capacity(72);
        msg.extend_from_slice(peer_id.as_bytes());
        msg.extend_from_slice(root.as_bytes());
        msg.extend_from_slice(&expires_at.to_be_bytes());
        msg
    }

    /// Signs a promise to retain `root` for `ttl` from now.
    pub fn sign(key: &SigningKey, root: BlobId, ttl: Duration) -> Promise {
        let peer_id = peer_id_from_key(&key.verifying_key());
        let expires_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(ttl)
            .as_secs();
        let signature = key.sign(&Self::signable(&peer_id, &root, expires_at));
        Promise {
            peer_id,
            root,
            expires_at,
            verifying_key: key.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Checks the embedded key against `peer_id` and the signature against
    /// the promise body.
    pub fn verify(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.verifying_key) else {
            return false;
        };
        if peer_id_from_key(&key) != self.peer_id {
            return false;
        }
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        key.verify(&Self::signable(&self.peer_id, &self.root, self.expires_at), &signature)
            .is_ok()
    }
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, NetError> {
    postcard::to_allocvec(msg).map_err(|e| NetError::Codec { message: e.to_string() })
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, NetError> {
    postcard::from_bytes(data).map_err(|e| NetError::Codec { message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use hoard_blobs::hash;

    use super::*;

    #[test]
    fn messages_round_trip() {
        let req = ListBlobsReq {
            routing_tag: vec![1, 2, 3],
            prefix: vec![0xab],
        };
        let decoded: ListBlobsReq = decode(&encode(&req).unwrap()).unwrap();
        assert_eq!(decoded.routing_tag, req.routing_tag);
        assert_eq!(decoded.prefix, req.prefix);
    }

    #[test]
    fn promise_verifies_and_rejects_tampering() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let promise = Promise::sign(&key, hash(b"root"), Duration::from_secs(3600));
        assert!(promise.verify());

        let mut wrong_root = promise.clone();
        wrong_root.root = hash(b"other root");
        assert!(!wrong_root.verify());

        let mut wrong_peer = promise.clone();
        wrong_peer.peer_id = PeerId([0u8; 32]);
        assert!(!wrong_peer.verify());

        let mut wrong_key = promise;
        wrong_key.verifying_key = SigningKey::from_bytes(&[8u8; 32]).verifying_key().to_bytes();
        assert!(!wrong_key.verify());
    }
}
