//! Fitness sharing: per-species mean fitness normalized onto a common scale.

use mixgen_contract::SpeciesId;

use crate::error::EvolutionError;
use crate::store::GenomeStore;

/// A species that takes part in offspring allocation this cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeciesShare {
    pub species_id: SpeciesId,
    pub adjusted_fitness: f64,
    /// Evaluated, non-elite members scheduled to die.
    pub dying: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FitnessAdjuster;

impl FitnessAdjuster {
    /// Computes the adjusted fitness of every active species with dying members.
    ///
    /// The pool is the fitness of every dying genome across those species. Each
    /// species scores `(mean(its dying fitnesses) - min) / max(1, max - min)`, which is
    /// also written to `Species::adjusted_fitness`. Species with nothing dying are left
    /// out of the result.
    pub fn adjust<G, P>(
        &self,
        store: &mut GenomeStore<G, P>,
    ) -> Result<Vec<SpeciesShare>, EvolutionError> {
        let mut per_species = Vec::new();
        let mut pool = Vec::new();
        for species_id in store.active_species_ids() {
            let dying = store.dying_genomes(species_id)?;
            let fitnesses = store.fitnesses_of(&dying);
            if fitnesses.is_empty() {
                continue;
            }
            pool.extend_from_slice(&fitnesses);
            per_species.push((species_id, dying.len(), fitnesses));
        }
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let min = pool.iter().copied().fold(f64::INFINITY, f64::min);
        let max = pool.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = (max - min).max(1.0);

        let mut shares = Vec::with_capacity(per_species.len());
        for (species_id, dying, fitnesses) in per_species {
            let mean = fitnesses.iter().sum::<f64>() / fitnesses.len() as f64;
            let adjusted_fitness = (mean - min) / range;
            store.species_mut(species_id)?.adjusted_fitness = Some(adjusted_fitness);
            shares.push(SpeciesShare {
                species_id,
                adjusted_fitness,
                dying,
            });
        }
        Ok(shares)
    }
}
