//! Offspring allocation: integer quotas per species from adjusted fitness.
//!
//! The policy sits behind [OffspringAllocation] so alternative rounding schemes can be
//! swapped in. [DeficitAllocator] is the default.

use mixgen_contract::SpeciesId;
use serde::{Deserialize, Serialize};

use crate::config::{ReproductionConfig, RoundingMode};
use crate::fitness::SpeciesShare;

/// Offspring quota for one species. The quota covers elites and new children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesQuota {
    pub species_id: SpeciesId,
    pub offspring: usize,
}

/// Turns adjusted fitness and dying counts into per-species quotas.
pub trait OffspringAllocation: Send + Sync {
    /// `total_dying` is the dying population of the whole cycle. Quotas are returned
    /// in the order of `shares`.
    fn allocate(&self, shares: &[SpeciesShare], total_dying: usize) -> Vec<SpeciesQuota>;
}

/// Two-stage allocation: each species moves halfway from its dying count toward its
/// fitness-proportional expected size, then all requests are rescaled so they sum to
/// roughly the dying population.
#[derive(Clone, Debug)]
pub struct DeficitAllocator {
    min_species_size: usize,
    rounding: RoundingMode,
}

impl DeficitAllocator {
    pub fn new(min_species_size: usize, rounding: RoundingMode) -> Self {
        Self {
            min_species_size,
            rounding,
        }
    }

    /// Uses `max(min_species_size, elitism)` as the per-species floor so a species
    /// that reproduces always has room for its elites.
    pub fn from_config(config: &ReproductionConfig) -> Self {
        Self::new(
            config.min_species_size.max(config.elitism),
            config.rounding,
        )
    }

    pub fn min_species_size(&self) -> usize {
        self.min_species_size
    }

    /// Raw request of one species before global renormalization.
    fn deficit(&self, share: &SpeciesShare, total_adjusted: f64, total_dying: usize) -> f64 {
        let floor = self.min_species_size as f64;
        let expected = if total_adjusted > 0.0 {
            floor.max(share.adjusted_fitness / total_adjusted * total_dying as f64)
        } else {
            floor
        };
        let dying = share.dying as f64;
        let half_step = (expected - dying) * 0.5;
        let mut step = self.rounding.round(half_step);
        if step == 0.0 {
            if half_step > 0.0 {
                step = 1.0;
            } else if half_step < 0.0 {
                step = -1.0;
            }
        }
        (dying + step).max(0.0)
    }
}

impl OffspringAllocation for DeficitAllocator {
    fn allocate(&self, shares: &[SpeciesShare], total_dying: usize) -> Vec<SpeciesQuota> {
        let total_adjusted: f64 = shares.iter().map(|share| share.adjusted_fitness).sum();
        let deficits: Vec<f64> = shares
            .iter()
            .map(|share| self.deficit(share, total_adjusted, total_dying))
            .collect();
        let total_deficit: f64 = deficits.iter().sum();

        shares
            .iter()
            .zip(deficits)
            .map(|(share, deficit)| {
                let offspring = if total_deficit > 0.0 {
                    let norm = total_dying as f64 / total_deficit;
                    let scaled = self.rounding.round(deficit * norm).max(0.0) as usize;
                    scaled.max(self.min_species_size)
                } else {
                    self.min_species_size
                };
                SpeciesQuota {
                    species_id: share.species_id,
                    offspring,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(species_id: SpeciesId, adjusted_fitness: f64, dying: usize) -> SpeciesShare {
        SpeciesShare {
            species_id,
            adjusted_fitness,
            dying,
        }
    }

    fn offspring(quotas: &[SpeciesQuota]) -> Vec<usize> {
        quotas.iter().map(|quota| quota.offspring).collect()
    }

    #[test]
    fn single_species_takes_the_whole_dying_population() {
        let allocator = DeficitAllocator::new(2, RoundingMode::HalfEven);
        let quotas = allocator.allocate(&[share(1, 0.5, 10)], 10);
        assert_eq!(quotas, vec![SpeciesQuota { species_id: 1, offspring: 10 }]);
    }

    #[test]
    fn all_equal_fitness_falls_back_to_floor_and_conserves() {
        let allocator = DeficitAllocator::new(2, RoundingMode::HalfEven);
        let shares = [share(1, 0.0, 5), share(2, 0.0, 5), share(3, 0.0, 5)];
        let quotas = allocator.allocate(&shares, 15);
        let total: usize = offspring(&quotas).iter().sum();
        assert!(total.abs_diff(15) <= shares.len());
        assert!(quotas.iter().all(|quota| quota.offspring >= 2));
        assert_eq!(quotas[0].offspring, quotas[1].offspring);
        assert_eq!(quotas[1].offspring, quotas[2].offspring);
    }

    #[test]
    fn dominant_species_takes_most_offspring() {
        let allocator = DeficitAllocator::new(2, RoundingMode::HalfEven);
        let shares = [share(1, 1.0, 8), share(2, 0.0, 2)];
        let quotas = allocator.allocate(&shares, 10);
        assert_eq!(offspring(&quotas), vec![8, 2]);
    }

    #[test]
    fn small_gaps_still_move_one_step() {
        let allocator = DeficitAllocator::new(1, RoundingMode::HalfEven);
        // Expected sizes 6 and 4 against 5 dying each: half-steps of +0.5 and -0.5.
        let shares = [share(1, 0.6, 5), share(2, 0.4, 5)];
        assert_eq!(allocator.deficit(&shares[0], 1.0, 10), 6.0);
        assert_eq!(allocator.deficit(&shares[1], 1.0, 10), 4.0);
        assert_eq!(offspring(&allocator.allocate(&shares, 10)), vec![6, 4]);
    }

    #[test]
    fn zero_total_deficit_gives_every_species_the_floor() {
        // Expected size 0 against 1 dying: both raw requests collapse to zero.
        let allocator = DeficitAllocator::new(0, RoundingMode::HalfEven);
        let shares = [share(1, 0.0, 1), share(2, 0.0, 1)];
        assert_eq!(allocator.deficit(&shares[0], 0.0, 2), 0.0);
        assert_eq!(offspring(&allocator.allocate(&shares, 2)), vec![0, 0]);
    }

    #[test]
    fn zero_dying_population_does_not_divide_by_zero() {
        let allocator = DeficitAllocator::new(2, RoundingMode::HalfEven);
        let quotas = allocator.allocate(&[share(1, 1.0, 0), share(2, 0.0, 0)], 0);
        assert_eq!(offspring(&quotas), vec![2, 2]);
        assert!(allocator.allocate(&[], 0).is_empty());
    }

    #[test]
    fn rounding_mode_changes_tie_results() {
        // Expected 4 against 3 dying: half-step 0.5 is pushed up to a full step.
        let tied = [share(1, 1.0, 3), share(2, 1.0, 3)];
        let even = DeficitAllocator::new(2, RoundingMode::HalfEven);
        let away = DeficitAllocator::new(2, RoundingMode::HalfAwayFromZero);
        assert_eq!(even.deficit(&tied[0], 2.0, 8), 4.0);
        assert_eq!(away.deficit(&tied[0], 2.0, 8), 4.0);
        assert_eq!(offspring(&even.allocate(&tied, 8)), vec![4, 4]);

        // Expected 6 against 1 dying: half-step 2.5.
        let single = [share(1, 1.0, 1)];
        let even = DeficitAllocator::new(1, RoundingMode::HalfEven);
        let away = DeficitAllocator::new(1, RoundingMode::HalfAwayFromZero);
        assert_eq!(even.deficit(&single[0], 1.0, 6), 3.0);
        assert_eq!(away.deficit(&single[0], 1.0, 6), 4.0);
    }

    #[test]
    fn floor_includes_elitism() {
        let config = ReproductionConfig {
            elitism: 3,
            min_species_size: 2,
            ..ReproductionConfig::default()
        };
        assert_eq!(DeficitAllocator::from_config(&config).min_species_size(), 3);
    }
}
