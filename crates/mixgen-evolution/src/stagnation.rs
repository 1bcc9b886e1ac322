//! Per-species fitness history and stagnation detection.

use std::cmp::Ordering;

use mixgen_contract::{Generation, SpeciesId};

use crate::config::{Aggregator, StagnationConfig};
use crate::error::EvolutionError;
use crate::store::GenomeStore;

/// Stagnation verdict for one species in one generation.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeciesStatus {
    pub species_id: SpeciesId,
    /// Aggregated fitness of the evaluated members, negative infinity if none.
    pub fitness: f64,
    pub members: usize,
    pub stagnant: bool,
}

/// A species removed for stagnation, with the genomes that died with it.
#[derive(Clone, Debug, PartialEq)]
pub struct RemovedSpecies {
    pub species_id: SpeciesId,
    pub fitness: f64,
    pub removed_genomes: usize,
}

#[derive(Clone, Debug)]
pub struct StagnationTracker {
    species_fitness: Aggregator,
    max_stagnation: u64,
    species_elitism: usize,
}

impl StagnationTracker {
    pub fn new(config: &StagnationConfig) -> Self {
        Self {
            species_fitness: config.species_fitness,
            max_stagnation: config.max_stagnation,
            species_elitism: config.species_elitism,
        }
    }

    /// Records this generation's fitness for every active species and decides which
    /// ones are stagnant.
    ///
    /// A species improves when its fitness beats every value in its history. The
    /// `species_elitism` best species are never stagnant; any other species is
    /// stagnant once `generation - last_improved_generation > max_stagnation`.
    /// Statuses are returned best species first.
    pub fn update<G, P>(
        &self,
        store: &mut GenomeStore<G, P>,
        generation: Generation,
    ) -> Result<Vec<SpeciesStatus>, EvolutionError> {
        let mut statuses = Vec::new();
        for species_id in store.active_species_ids() {
            let evaluated = store.evaluated_members(species_id)?;
            let fitness = self
                .species_fitness
                .aggregate(&store.fitnesses_of(&evaluated));
            let species = store.species_mut(species_id)?;
            let previous_best = species
                .fitness_history
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            species.fitness_history.push(fitness);
            species.fitness = fitness.is_finite().then_some(fitness);
            species.adjusted_fitness = None;
            if fitness > previous_best {
                species.last_improved_generation = generation;
            }
            let stalled_for = generation.saturating_sub(species.last_improved_generation);
            statuses.push(SpeciesStatus {
                species_id,
                fitness,
                members: species.len(),
                stagnant: stalled_for > self.max_stagnation,
            });
        }

        statuses.sort_by(|a, b| {
            b.fitness
                .partial_cmp(&a.fitness)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.species_id.cmp(&b.species_id))
        });
        for status in statuses.iter_mut().take(self.species_elitism) {
            status.stagnant = false;
        }
        Ok(statuses)
    }

    /// Deactivates every stagnant species and deletes its remaining members.
    pub fn remove_stagnant<G, P>(
        &self,
        store: &mut GenomeStore<G, P>,
        statuses: &[SpeciesStatus],
    ) -> Result<Vec<RemovedSpecies>, EvolutionError> {
        let mut removed = Vec::new();
        for status in statuses.iter().filter(|status| status.stagnant) {
            let species = store.species_mut(status.species_id)?;
            species.active = false;
            let members: Vec<_> = species.members().iter().copied().collect();
            for genome_id in &members {
                store.remove(*genome_id)?;
            }
            store.remove_species(status.species_id)?;
            tracing::debug!(
                species_id = status.species_id,
                removed = members.len(),
                "removed stagnant species"
            );
            removed.push(RemovedSpecies {
                species_id: status.species_id,
                fitness: status.fitness,
                removed_genomes: members.len(),
            });
        }
        Ok(removed)
    }
}
