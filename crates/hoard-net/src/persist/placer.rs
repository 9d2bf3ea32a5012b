//! Replica placement.

use std::cmp::Ordering;
use std::collections::HashMap;

use hoard_blobs::BlobGet;
use hoard_blobs::BlobId;
use hoard_blobs::BlobPost;
use hoard_blobs::BlobSet;
use hoard_blobs::util::collect_ids;
use hoard_swarm::PeerId;

use crate::error::NetError;
use crate::kad::xor_distance;
use crate::persist::sets::TrieSet;

/// Default replica count.
pub const REPLICAS: usize = 2;

/// Default per-peer capacity in blobs.
pub const PEER_CAPACITY: u64 = 1_000;

/// Orders candidate peers for one blob; lesser sorts first.
pub type CostFn = Box<dyn Fn(&BlobId, &PeerId, &PeerId) -> Ordering + Send + Sync>;

/// Advertised capacity of a peer, in blobs.
pub type CapacityFn = Box<dyn Fn(&PeerId) -> u64 + Send + Sync>;

/// One peer's share of a plan: the root of the trie enumerating the IDs
/// placed on it, and their count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub root: BlobId,
    pub count: u64,
}

/// A replication plan: one placement per candidate peer.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub placements: HashMap<PeerId, Placement>,
}

/// Assigns each blob of a set to its `replicas` cheapest peers with
/// remaining capacity.
pub struct Placer<S> {
    store: S,
    replicas: usize,
    compare_costs: CostFn,
    get_capacity: CapacityFn,
}

impl<S> Placer<S>
where
    S: BlobGet + BlobPost + Clone + Send + Sync,
{
    pub fn new(store: S, replicas: usize, compare_costs: CostFn, get_capacity: CapacityFn) -> Self {
        Placer {
            store,
            replicas,
            compare_costs,
            get_capacity,
        }
    }

    /// The store holding the placement tries.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The standard cost ordering: ascending XOR distance between peer and
    /// blob, with the local peer always first.
    pub fn kad_costs(local: PeerId) -> CostFn {
        Box::new(move |id, a, b| {
            if *a == local || *b == local {
                return if a == b {
                    Ordering::Equal
                } else if *a == local {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            let da = xor_distance(id.as_bytes(), a.as_bytes());
            let db = xor_distance(id.as_bytes(), b.as_bytes());
            da.cmp(&db)
        })
    }

    /// A flat capacity for every peer.
    pub fn flat_capacity(cap: u64) -> CapacityFn {
        Box::new(move |_| cap)
    }

    /// Builds a plan placing every ID of `set` onto `peers`.
    pub async fn make_plan(&self, peers: &[PeerId], set: &dyn BlobSet) -> Result<Plan, NetError> {
        let mut loads: HashMap<PeerId, u64> = HashMap::new();
        let mut trie_sets: HashMap<PeerId, TrieSet<S>> = HashMap::new();
        for peer in peers {
            trie_sets.insert(*peer, TrieSet::new(self.store.clone()).await?);
        }

        for id in collect_ids(set, &[]).await? {
            self.place(&mut loads, peers, &id, &mut trie_sets).await?;
        }

        let mut plan = Plan::default();
        for (peer, trie_set) in trie_sets {
            plan.placements.insert(
                peer,
                Placement {
                    root: trie_set.root(),
                    count: loads.get(&peer).copied().unwrap_or(0),
                },
            );
        }
        Ok(plan)
    }

    /// Extends an existing plan with one more ID.
    pub async fn add_id_to_plan(&self, plan: &mut Plan, peers: &[PeerId], id: &BlobId) -> Result<(), NetError> {
        let mut loads: HashMap<PeerId, u64> = plan.placements.iter().map(|(p, pl)| (*p, pl.count)).collect();
        let mut trie_sets: HashMap<PeerId, TrieSet<S>> = HashMap::new();
        for peer in peers {
            let trie_set = match plan.placements.get(peer) {
                Some(placement) => TrieSet::with_root(self.store.clone(), placement.root),
                None => TrieSet::new(self.store.clone()).await?,
            };
            trie_sets.insert(*peer, trie_set);
        }

        self.place(&mut loads, peers, id, &mut trie_sets).await?;

        for (peer, trie_set) in trie_sets {
            plan.placements.insert(
                peer,
                Placement {
                    root: trie_set.root(),
                    count: loads.get(&peer).copied().unwrap_or(0),
                },
            );
        }
        Ok(())
    }

    /// Places one ID onto its cheapest peers, skipping peers at capacity and
    /// charging each placement against the peer's load. Fails with `Full`
    /// when fewer than `min(replicas, |peers|)` peers can take the blob.
    async fn place(
        &self,
        loads: &mut HashMap<PeerId, u64>,
        peers: &[PeerId],
        id: &BlobId,
        trie_sets: &mut HashMap<PeerId, TrieSet<S>>,
    ) -> Result<(), NetError> {
        let mut ordered = peers.to_vec();
        ordered.sort_by(|a, b| (self.compare_costs)(id, a, b));

        let required = self.replicas.min(peers.len());
        let mut placed = 0;
        for peer in ordered {
            let load = loads.get(&peer).copied().unwrap_or(0);
            if load >= (self.get_capacity)(&peer) {
                continue;
            }
            if let Some(trie_set) = trie_sets.get_mut(&peer) {
                trie_set.add(id).await?;
            }
            *loads.entry(peer).or_insert(0) += 1;
            placed += 1;
            if placed >= required {
                return Ok(());
            }
        }
        // Exhausted every candidate: the network is full for this blob.
        Err(NetError::Full)
    }
}
