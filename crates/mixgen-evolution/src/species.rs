//! Species records and the speciation pass run after every reproduction.

use std::collections::BTreeSet;

use mixgen_contract::{Generation, Genome, GenomeId, SpeciesId};
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SpeciationConfig;
use crate::distance::DistanceCache;
use crate::error::EvolutionError;
use crate::store::GenomeStore;

/// A cluster of genomes close to a shared representative.
///
/// Membership and representative are maintained by [GenomeStore]; the fitness fields
/// are written by the stagnation tracker and the fitness adjuster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Species {
    id: SpeciesId,
    representative_id: Option<GenomeId>,
    members: BTreeSet<GenomeId>,
    pub fitness: Option<f64>,
    pub adjusted_fitness: Option<f64>,
    pub fitness_history: Vec<f64>,
    pub created_generation: Generation,
    pub last_improved_generation: Generation,
    pub active: bool,
}

impl Species {
    pub(crate) fn new(id: SpeciesId, generation: Generation) -> Self {
        Self {
            id,
            representative_id: None,
            members: BTreeSet::new(),
            fitness: None,
            adjusted_fitness: None,
            fitness_history: Vec::new(),
            created_generation: generation,
            last_improved_generation: generation,
            active: true,
        }
    }

    pub fn id(&self) -> SpeciesId {
        self.id
    }

    pub fn representative_id(&self) -> Option<GenomeId> {
        self.representative_id
    }

    pub fn members(&self) -> &BTreeSet<GenomeId> {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn insert_member(&mut self, id: GenomeId) {
        self.members.insert(id);
    }

    pub(crate) fn remove_member(&mut self, id: GenomeId) {
        self.members.remove(&id);
        if self.representative_id == Some(id) {
            self.representative_id = None;
        }
    }

    pub(crate) fn set_representative_id(&mut self, id: Option<GenomeId>) {
        self.representative_id = id;
    }
}

/// Result of one speciation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeciationOutcome {
    /// Species that had no members left and were dropped before partitioning.
    pub pruned: Vec<SpeciesId>,
    pub created: Vec<SpeciesId>,
    /// Genomes assigned by this pass (new representatives included).
    pub assigned: usize,
}

/// Partitions unspeciated genomes into species.
#[derive(Clone, Debug)]
pub struct Speciator {
    compatibility_threshold: f64,
}

impl Speciator {
    pub fn new(config: &SpeciationConfig) -> Self {
        Self {
            compatibility_threshold: config.compatibility_threshold,
        }
    }

    pub fn compatibility_threshold(&self) -> f64 {
        self.compatibility_threshold
    }

    /// Assigns every unspeciated genome to a species.
    ///
    /// 1. Empty species are dropped.
    /// 2. Each remaining species promotes the unspeciated genome closest to its
    ///    previous representative (a random one when that representative is gone).
    /// 3. Each other unspeciated genome, in id order, joins the species with the
    ///    nearest representative strictly below the compatibility threshold, lowest
    ///    species id on ties, or founds a new species.
    ///
    /// Afterwards `unspeciated` is empty and every species has a representative that
    /// is one of its members.
    pub fn speciate<G: Genome, P, R: Rng + ?Sized>(
        &self,
        store: &mut GenomeStore<G, P>,
        cache: &mut DistanceCache,
        genome_config: &G::Config,
        generation: Generation,
        rng: &mut R,
    ) -> Result<SpeciationOutcome, EvolutionError> {
        let mut outcome = SpeciationOutcome::default();

        for species_id in store.species_ids() {
            if store.species(species_id)?.is_empty() {
                store.remove_species(species_id)?;
                outcome.pruned.push(species_id);
            }
        }

        for species_id in store.active_species_ids() {
            if store.unspeciated().is_empty() {
                break;
            }
            let previous = store.species(species_id)?.representative_id();
            let chosen = match previous {
                Some(representative) => {
                    self.closest_unspeciated(store, cache, genome_config, representative)?
                }
                None => store.unspeciated().iter().copied().choose(rng),
            };
            if let Some(genome_id) = chosen {
                store.set_representative(species_id, genome_id)?;
                outcome.assigned += 1;
            }
        }

        let pending: Vec<GenomeId> = store.unspeciated().iter().copied().collect();
        for genome_id in pending {
            match self.nearest_compatible(store, cache, genome_config, genome_id)? {
                Some(species_id) => store.assign_to_species(genome_id, species_id)?,
                None => {
                    let species_id = store.create_species(genome_id, generation)?;
                    outcome.created.push(species_id);
                    tracing::debug!(species_id, genome_id, generation, "new species");
                }
            }
            outcome.assigned += 1;
        }

        for species_id in store.species_ids() {
            let species = store.species(species_id)?;
            if species.representative_id().is_some() {
                continue;
            }
            let first = species.members().iter().next().copied();
            if let Some(first) = first {
                store.set_representative(species_id, first)?;
            }
        }

        Ok(outcome)
    }

    fn closest_unspeciated<G: Genome, P>(
        &self,
        store: &GenomeStore<G, P>,
        cache: &mut DistanceCache,
        genome_config: &G::Config,
        representative: GenomeId,
    ) -> Result<Option<GenomeId>, EvolutionError> {
        let mut best: Option<(GenomeId, f64)> = None;
        for candidate in store.unspeciated().iter().copied() {
            let distance = cache.distance(store, genome_config, representative, candidate)?;
            if best.map_or(true, |(_, current)| distance < current) {
                best = Some((candidate, distance));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    fn nearest_compatible<G: Genome, P>(
        &self,
        store: &GenomeStore<G, P>,
        cache: &mut DistanceCache,
        genome_config: &G::Config,
        genome_id: GenomeId,
    ) -> Result<Option<SpeciesId>, EvolutionError> {
        let mut best: Option<(SpeciesId, f64)> = None;
        for species_id in store.active_species_ids() {
            let Some(representative) = store.species(species_id)?.representative_id() else {
                continue;
            };
            let distance = cache.distance(store, genome_config, representative, genome_id)?;
            if distance >= self.compatibility_threshold {
                continue;
            }
            if best.map_or(true, |(_, current)| distance < current) {
                best = Some((species_id, distance));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}
