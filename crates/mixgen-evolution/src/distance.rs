//! Memoized genetic distance between genomes.
//!
//! Genomes are immutable once stored and ids are never reused, so an entry can never
//! go stale and the cache has no eviction. Both orderings of a pair are stored.

use std::collections::HashMap;

use mixgen_contract::{Genome, GenomeId};

use crate::error::EvolutionError;
use crate::store::GenomeStore;

#[derive(Clone, Debug, Default)]
pub struct DistanceCache {
    distances: HashMap<(GenomeId, GenomeId), f64>,
    hits: u64,
    misses: u64,
}

impl DistanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distance between two stored genomes, computed at most once per unordered pair.
    pub fn distance<G: Genome, P>(
        &mut self,
        store: &GenomeStore<G, P>,
        config: &G::Config,
        a: GenomeId,
        b: GenomeId,
    ) -> Result<f64, EvolutionError> {
        if let Some(distance) = self.distances.get(&(a, b)) {
            self.hits += 1;
            return Ok(*distance);
        }
        let distance = store.get(a)?.distance(store.get(b)?, config);
        self.distances.insert((a, b), distance);
        self.distances.insert((b, a), distance);
        self.misses += 1;
        Ok(distance)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of unordered pairs cached.
    pub fn len(&self) -> usize {
        let self_pairs = self.distances.keys().filter(|(a, b)| a == b).count();
        (self.distances.len() + self_pairs) / 2
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Mean and standard deviation of every cached distance.
    pub fn stats(&self) -> Option<(f64, f64)> {
        if self.distances.is_empty() {
            return None;
        }
        let count = self.distances.len() as f64;
        let mean = self.distances.values().sum::<f64>() / count;
        let variance = self
            .distances
            .values()
            .map(|d| (d - mean).powi(2))
            .sum::<f64>()
            / count;
        Some((mean, variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rand::Rng;

    use super::*;

    /// Genome on a line that counts how often its distance is computed.
    #[derive(Clone)]
    struct CountingGenome {
        position: f64,
        calls: Arc<AtomicUsize>,
    }

    struct CountingConfig;

    impl Genome for CountingGenome {
        type Config = CountingConfig;

        fn new(id: GenomeId) -> Self {
            Self {
                position: id as f64,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn configure_new<R: Rng + ?Sized>(&mut self, _config: &CountingConfig, _rng: &mut R) {}

        fn configure_crossover<R: Rng + ?Sized>(
            &mut self,
            parent_a: &Self,
            _parent_b: &Self,
            _config: &CountingConfig,
            _rng: &mut R,
        ) {
            self.position = parent_a.position;
        }

        fn mutate<R: Rng + ?Sized>(&mut self, _config: &CountingConfig, _rng: &mut R) {}

        fn distance(&self, other: &Self, _config: &CountingConfig) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.position - other.position).abs()
        }
    }

    fn store_of(positions: &[f64], calls: &Arc<AtomicUsize>) -> GenomeStore<CountingGenome> {
        let mut store = GenomeStore::new();
        for position in positions {
            let id = store.reserve_id();
            let genome = CountingGenome {
                position: *position,
                calls: calls.clone(),
            };
            store.add(id, genome, None, 0).unwrap();
        }
        store
    }

    #[test]
    fn symmetric_and_computed_once_per_pair() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_of(&[0.0, 1.5, 4.0, -2.0], &calls);
        let mut cache = DistanceCache::new();

        for _ in 0..3 {
            for a in 1..=4 {
                for b in 1..=4 {
                    let ab = cache.distance(&store, &CountingConfig, a, b).unwrap();
                    let ba = cache.distance(&store, &CountingConfig, b, a).unwrap();
                    assert_eq!(ab, ba);
                }
            }
        }

        // 6 distinct pairs plus 4 self pairs.
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(cache.misses(), 10);
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.hits(), 3 * 16 * 2 - 10);
    }

    #[test]
    fn unknown_genome_is_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_of(&[0.0], &calls);
        let mut cache = DistanceCache::new();
        let err = cache.distance(&store, &CountingConfig, 1, 9).unwrap_err();
        assert!(matches!(err, EvolutionError::NotFound { id: 9, .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_over_cached_distances() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_of(&[0.0, 2.0, 4.0], &calls);
        let mut cache = DistanceCache::new();
        assert!(cache.stats().is_none());
        cache.distance(&store, &CountingConfig, 1, 2).unwrap();
        cache.distance(&store, &CountingConfig, 2, 3).unwrap();
        let (mean, stdev) = cache.stats().unwrap();
        assert_eq!(mean, 2.0);
        assert_eq!(stdev, 0.0);
    }
}
