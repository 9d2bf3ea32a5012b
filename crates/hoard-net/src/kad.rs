//! Kademlia routing table over the blob-ID space.

use std::time::Instant;

use hoard_blobs::BlobId;
use hoard_swarm::PeerId;
use parking_lot::RwLock;

use crate::bitstrings::BitPrefixSet;
use crate::bitstrings::BitString;
use crate::error::NetError;

/// Default entries per bucket.
pub const BUCKET_CAP: usize = 16;

/// XOR distance between two 32-byte IDs.
pub fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Number of leading zero bits in a distance; 256 for the zero distance.
pub fn leading_zeros(d: &[u8; 32]) -> usize {
    let mut n = 0;
    for byte in d {
        if *byte == 0 {
            n += 8;
            continue;
        }
        n += byte.leading_zeros() as usize;
        break;
    }
    n
}

#[derive(Debug, Clone)]
struct KadEntry {
    blob_id: BlobId,
    peer_id: PeerId,
    added_at: Instant,
}

/// A bucketed routing table centred on the local peer ID.
///
/// Entry `(blob, peer)` lives in the bucket indexed by the number of leading
/// zero bits in `blob XOR locus`, so the table holds exponentially more
/// detail about the region of the ID space closest to the local node. A full
/// bucket rejects inserts with [`NetError::ShouldEvictThis`]; the entry is
/// not stored and the caller learns it.
pub struct KadRoutingTable {
    locus: [u8; 32],
    cap: usize,
    buckets: RwLock<Vec<Vec<KadEntry>>>,
}

impl KadRoutingTable {
    pub fn new(locus: PeerId, cap: usize) -> Self {
        KadRoutingTable {
            locus: *locus.as_bytes(),
            cap,
            buckets: RwLock::new((0..=256).map(|_| Vec::new()).collect()),
        }
    }

    fn bucket_index(&self, blob: &BlobId) -> usize {
        leading_zeros(&xor_distance(&self.locus, blob.as_bytes()))
    }

    /// Records that `peer` holds `blob`. Re-inserting an existing entry only
    /// refreshes its timestamp.
    pub fn put(&self, blob: BlobId, peer: PeerId) -> Result<(), NetError> {
        let idx = self.bucket_index(&blob);
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[idx];
        if let Some(entry) = bucket.iter_mut().find(|e| e.blob_id == blob && e.peer_id == peer) {
            entry.added_at = Instant::now();
            return Ok(());
        }
        if bucket.len() >= self.cap {
            return Err(NetError::ShouldEvictThis);
        }
        bucket.push(KadEntry {
            blob_id: blob,
            peer_id: peer,
            added_at: Instant::now(),
        });
        Ok(())
    }

    /// The peers recorded as holding `blob`, most recently confirmed first.
    pub fn who_has(&self, blob: &BlobId) -> Vec<PeerId> {
        let idx = self.bucket_index(blob);
        let buckets = self.buckets.read();
        let mut holders: Vec<&KadEntry> = buckets[idx].iter().filter(|e| e.blob_id == *blob).collect();
        holders.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        holders.into_iter().map(|e| e.peer_id).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bit prefixes of the ID space this table still has capacity for:
    /// one prefix per non-full bucket. The crawler intersects its work with
    /// this set so it never fetches entries the table would reject.
    pub fn would_accept(&self) -> BitPrefixSet {
        let locus = BitString::from_bytes(&self.locus);
        let buckets = self.buckets.read();
        let mut prefixes = Vec::new();
        for (i, bucket) in buckets.iter().enumerate() {
            if bucket.len() >= self.cap {
                continue;
            }
            if i == 256 {
                prefixes.push(locus.clone());
            } else {
                // IDs in bucket i share the locus's first i bits and differ
                // at bit i.
                prefixes.push(locus.truncated(i + 1).flipped(i));
            }
        }
        BitPrefixSet::new(prefixes)
    }
}
