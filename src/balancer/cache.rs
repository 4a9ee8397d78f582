//! Weighted group cache fed by the balancer.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;

use crate::key::GroupId;

/// For each observed group-set size, the candidate group lists and their
/// weights. Refresh installs a whole new snapshot; readers hold the lock
/// only for the pick.
pub type GroupWeights = HashMap<u64, Vec<(Vec<GroupId>, u64)>>;

#[derive(Default)]
pub struct WeightCache {
    snapshot: RwLock<Option<GroupWeights>>,
}

impl WeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialized(&self) -> bool {
        self.snapshot.read().expect("weight cache lock poisoned").is_some()
    }

    pub fn install(&self, weights: GroupWeights) {
        *self.snapshot.write().expect("weight cache lock poisoned") = Some(weights);
    }

    /// Weighted-random pick of a group list of the given size. `None` when
    /// the cache is uninitialized or has no entry for that size.
    pub fn choose(&self, size: u64) -> Option<Vec<GroupId>> {
        let snapshot = self.snapshot.read().expect("weight cache lock poisoned");
        let candidates = snapshot.as_ref()?.get(&size)?;
        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates.iter().map(|(_, weight)| *weight).sum();
        if total == 0 {
            let index = rand::thread_rng().gen_range(0..candidates.len());
            return Some(candidates[index].0.clone());
        }

        let mut roll = rand::thread_rng().gen_range(0..total);
        for (groups, weight) in candidates {
            if roll < *weight {
                return Some(groups.clone());
            }
            roll -= *weight;
        }

        candidates.last().map(|(groups, _)| groups.clone())
    }
}
