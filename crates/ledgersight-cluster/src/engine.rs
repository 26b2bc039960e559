//! Union-find cluster arena with separation assertions.
//!
//! Parent pointers are per-slot atomics, so lookups take only a read
//! lock on the arena and compress paths with compare-and-swap as they
//! go. Structural changes (new addresses, merges) take the write lock.
//!
//! Merge evidence below the configured threshold accumulates per
//! address pair (noisy-or combination) until it clears the bar. A
//! standing separation assertion always holds a merge back, regardless
//! of confidence; the contested pair is queued as a
//! [`ClusteringConflict`] for analyst review.

use ledgersight_core::config::ClusteringConfig;
use ledgersight_core::error::ClusteringConflict;
use ledgersight_core::types::{AddressId, ClusterId, ClusterView};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Why two addresses are asserted to share a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    /// Addresses co-signed inputs of one transaction.
    CommonInput,
    /// Change-output continuation of a peeling step.
    PeelContinuation,
    /// Correlated counterparties and timing.
    TemporalSimilarity,
    /// Analyst-supplied assertion.
    Manual,
}

/// Outcome of a merge assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The two addresses now share a cluster.
    Merged(ClusterId),
    /// They already shared a cluster; no change.
    AlreadySame(ClusterId),
    /// Evidence accumulated but has not reached the merge threshold.
    Pending,
    /// A separation assertion held the merge back; a conflict was
    /// queued for review.
    Held,
}

struct Separation {
    a: u32,
    b: u32,
    confidence: f64,
}

#[derive(Default)]
struct Arena {
    index: HashMap<AddressId, u32>,
    addrs: Vec<AddressId>,
    // Parent slot index; a root points at itself.
    parents: Vec<AtomicU64>,
    members: HashMap<u32, Vec<u32>>,
    // Accumulated sub-threshold merge evidence, keyed by ordered pair.
    pending: HashMap<(AddressId, AddressId), f64>,
    separations: Vec<Separation>,
}

impl Arena {
    fn slot_of(&mut self, addr: AddressId) -> u32 {
        if let Some(&slot) = self.index.get(&addr) {
            return slot;
        }
        let slot = self.addrs.len() as u32;
        self.index.insert(addr, slot);
        self.addrs.push(addr);
        self.parents.push(AtomicU64::new(u64::from(slot)));
        self.members.insert(slot, vec![slot]);
        slot
    }

    /// Find the root slot, compressing the path along the way.
    fn find(&self, slot: u32) -> u32 {
        let mut current = u64::from(slot);
        loop {
            let parent = self.parents[current as usize].load(Ordering::Acquire);
            if parent == current {
                return current as u32;
            }
            let grandparent = self.parents[parent as usize].load(Ordering::Acquire);
            if grandparent != parent {
                // Halve the path; a lost race just means someone else
                // compressed first.
                let _ = self.parents[current as usize].compare_exchange_weak(
                    parent,
                    grandparent,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            current = parent;
        }
    }

    fn separation_between(&self, root_a: u32, root_b: u32) -> Option<f64> {
        self.separations
            .iter()
            .filter(|s| {
                let (ra, rb) = (self.find(s.a), self.find(s.b));
                (ra == root_a && rb == root_b) || (ra == root_b && rb == root_a)
            })
            .map(|s| s.confidence)
            .fold(None, |acc, c| Some(acc.map_or(c, |a: f64| a.max(c))))
    }
}

fn ordered(a: AddressId, b: AddressId) -> (AddressId, AddressId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn epoch_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Clustering engine. Cluster ids are the representative root address,
/// and a merge keeps the id of the larger side.
pub struct ClusterEngine {
    arena: RwLock<Arena>,
    conflicts: RwLock<Vec<ClusteringConflict>>,
    config: ClusteringConfig,
}

impl ClusterEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new(config: ClusteringConfig) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            conflicts: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Assert that two addresses share a controller.
    ///
    /// Evidence combines across calls for the same pair (noisy-or), so
    /// several weak signals can together clear the merge threshold.
    /// Re-asserting an established merge is a no-op, which makes
    /// replaying an evidence stream idempotent.
    pub fn assert_same(
        &self,
        a: AddressId,
        b: AddressId,
        confidence: f64,
        reason: MergeReason,
    ) -> MergeOutcome {
        if a == b {
            let arena = self.arena.read().unwrap();
            let root = arena.index.get(&a).map(|&s| arena.find(s));
            return match root {
                Some(r) => MergeOutcome::AlreadySame(arena.addrs[r as usize]),
                None => MergeOutcome::Pending,
            };
        }

        let mut arena = self.arena.write().unwrap();
        let slot_a = arena.slot_of(a);
        let slot_b = arena.slot_of(b);
        let root_a = arena.find(slot_a);
        let root_b = arena.find(slot_b);
        if root_a == root_b {
            return MergeOutcome::AlreadySame(arena.addrs[root_a as usize]);
        }

        let key = ordered(a, b);
        let prior = arena.pending.get(&key).copied().unwrap_or(0.0);
        let combined = 1.0 - (1.0 - prior) * (1.0 - confidence);

        if combined < self.config.merge_threshold {
            arena.pending.insert(key, combined);
            debug!(
                address_a = a,
                address_b = b,
                confidence = combined,
                ?reason,
                "merge evidence below threshold, accumulated"
            );
            return MergeOutcome::Pending;
        }

        if let Some(sep_confidence) = arena.separation_between(root_a, root_b) {
            let conflict = ClusteringConflict {
                cluster_a: arena.addrs[root_a as usize],
                cluster_b: arena.addrs[root_b as usize],
                merge_confidence: combined,
                separation_confidence: sep_confidence,
                detected_at: epoch_now(),
            };
            warn!(%conflict, "merge held back by separation assertion");
            arena.pending.insert(key, combined);
            self.conflicts.write().unwrap().push(conflict);
            return MergeOutcome::Held;
        }

        // Larger side survives and keeps its cluster id.
        let size_a = arena.members.get(&root_a).map_or(0, Vec::len);
        let size_b = arena.members.get(&root_b).map_or(0, Vec::len);
        let (winner, loser) = if size_a >= size_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };

        arena.parents[loser as usize].store(u64::from(winner), Ordering::Release);
        let absorbed = arena.members.remove(&loser).unwrap_or_default();
        if let Some(list) = arena.members.get_mut(&winner) {
            list.extend(absorbed);
        }
        arena.pending.remove(&key);

        let id = arena.addrs[winner as usize];
        debug!(address_a = a, address_b = b, cluster = id, ?reason, "clusters merged");
        MergeOutcome::Merged(id)
    }

    /// Assert that two addresses are controlled by distinct entities.
    ///
    /// If they already share a cluster the separation is still recorded
    /// and a conflict is queued; established merges are never unwound
    /// automatically.
    pub fn assert_separate(&self, a: AddressId, b: AddressId, confidence: f64) {
        let mut arena = self.arena.write().unwrap();
        let slot_a = arena.slot_of(a);
        let slot_b = arena.slot_of(b);
        arena.separations.push(Separation {
            a: slot_a,
            b: slot_b,
            confidence,
        });

        let root_a = arena.find(slot_a);
        let root_b = arena.find(slot_b);
        if root_a == root_b {
            let conflict = ClusteringConflict {
                cluster_a: arena.addrs[root_a as usize],
                cluster_b: arena.addrs[root_b as usize],
                merge_confidence: 1.0,
                separation_confidence: confidence,
                detected_at: epoch_now(),
            };
            warn!(%conflict, "separation asserted inside an existing cluster");
            self.conflicts.write().unwrap().push(conflict);
        }
    }

    /// Cluster of an address, if the address has been observed.
    #[must_use]
    pub fn cluster_of(&self, address: AddressId) -> Option<ClusterId> {
        let arena = self.arena.read().unwrap();
        let slot = *arena.index.get(&address)?;
        Some(arena.addrs[arena.find(slot) as usize])
    }

    /// Member addresses of a cluster. Empty if the id is unknown or no
    /// longer a root.
    #[must_use]
    pub fn members(&self, cluster: ClusterId) -> Vec<AddressId> {
        let arena = self.arena.read().unwrap();
        let Some(&slot) = arena.index.get(&cluster) else {
            return Vec::new();
        };
        let root = arena.find(slot);
        if arena.addrs[root as usize] != cluster {
            return Vec::new();
        }
        arena
            .members
            .get(&root)
            .map(|slots| slots.iter().map(|&s| arena.addrs[s as usize]).collect())
            .unwrap_or_default()
    }

    /// Number of distinct clusters (including singletons).
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.arena.read().unwrap().members.len()
    }

    /// Drain the queued conflicts for review.
    #[must_use]
    pub fn take_conflicts(&self) -> Vec<ClusteringConflict> {
        std::mem::take(&mut *self.conflicts.write().unwrap())
    }

    /// Number of conflicts currently queued.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.conflicts.read().unwrap().len()
    }
}

impl ClusterView for ClusterEngine {
    fn cluster_of(&self, address: AddressId) -> Option<ClusterId> {
        ClusterEngine::cluster_of(self, address)
    }

    fn members(&self, cluster: ClusterId) -> Vec<AddressId> {
        ClusterEngine::members(self, cluster)
    }
}
