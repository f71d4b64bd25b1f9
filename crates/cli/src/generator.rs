//! Activity id generators for simulations.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SHUFFLE_PASSES: usize = 3;

/// Produces submission orders that look like concurrent producers.
pub struct IdGenerator<R: Rng> {
    rng: R,
}

impl IdGenerator<StdRng> {
    /// Deterministic generator for a seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> IdGenerator<R> {
    /// Ids `1..=count`, each displaced by fewer than `randomness` positions.
    pub fn shuffled(&mut self, count: usize, randomness: usize) -> Vec<u64> {
        let mut ids: Vec<u64> = (1..=count as u64).collect();
        if count < 2 || randomness == 0 {
            return ids;
        }

        for _ in 0..SHUFFLE_PASSES {
            for i in 0..count - 1 {
                let j = (i + self.rng.gen_range(0..=randomness)).min(count - 1);
                if displacement(ids[i], j) < randomness && displacement(ids[j], i) < randomness {
                    ids.swap(i, j);
                }
            }
        }
        ids
    }

    /// Random ids from `1..=count`, repeating, until every id was drawn once.
    pub fn with_duplicates(&mut self, count: usize) -> Vec<u64> {
        let mut seen = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count * 2);
        while seen.len() < count {
            let id = self.rng.gen_range(1..=count as u64);
            ids.push(id);
            seen.insert(id);
        }
        ids
    }
}

/// Distance between an id's home position and where it currently sits.
fn displacement(id: u64, position: usize) -> usize {
    (id as usize - 1).abs_diff(position)
}
