//! Genome store: the single owner of genomes, species and every lifecycle index.
//!
//! Other components refer to genomes and species by id only. No index is updated
//! outside the methods of [GenomeStore], which keeps these invariants:
//!
//! * every alive genome is either in `unspeciated` or a member of exactly one species,
//!   and `genome_to_species` mirrors the species member sets;
//! * a genome is in at most one of `free`, `evaluated`, `elite`;
//! * a species representative, when set, is a member of that species;
//! * genome and species ids come from monotonic counters and are never reused, even
//!   across [GenomeStore::reset].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use mixgen_contract::{Generation, GenomeId, SpeciesId};
use serde::{Deserialize, Serialize};

use crate::error::EvolutionError;
use crate::species::Species;

/// One genome plus the bookkeeping the engine attaches to it.
#[derive(Clone, Debug)]
pub struct GenomeRecord<G, P> {
    pub id: GenomeId,
    pub genome: G,
    pub fitness: Option<f64>,
    /// Evaluation data the fitness was computed from.
    pub payload: Option<P>,
    /// `None` for genomes created from scratch.
    pub parents: Option<(GenomeId, GenomeId)>,
    pub born_generation: Generation,
}

/// Counts of every index, for inspection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub alive: usize,
    pub free: usize,
    pub evaluated: usize,
    pub elite: usize,
    pub unspeciated: usize,
    pub species: usize,
}

#[derive(Clone, Debug)]
pub struct GenomeStore<G, P = ()> {
    genomes: BTreeMap<GenomeId, GenomeRecord<G, P>>,
    free: BTreeSet<GenomeId>,
    evaluated: BTreeSet<GenomeId>,
    elite: BTreeSet<GenomeId>,
    unspeciated: BTreeSet<GenomeId>,
    species: BTreeMap<SpeciesId, Species>,
    genome_to_species: BTreeMap<GenomeId, SpeciesId>,
    next_genome_id: GenomeId,
    next_species_id: SpeciesId,
}

impl<G, P> Default for GenomeStore<G, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G, P> GenomeStore<G, P> {
    pub fn new() -> Self {
        Self {
            genomes: BTreeMap::new(),
            free: BTreeSet::new(),
            evaluated: BTreeSet::new(),
            elite: BTreeSet::new(),
            unspeciated: BTreeSet::new(),
            species: BTreeMap::new(),
            genome_to_species: BTreeMap::new(),
            next_genome_id: 1,
            next_species_id: 1,
        }
    }

    /// Mints a fresh genome id. Ids start at 1.
    pub fn reserve_id(&mut self) -> GenomeId {
        let id = self.next_genome_id;
        self.next_genome_id += 1;
        id
    }

    /// Inserts a genome under a previously reserved id. New genomes are alive,
    /// unspeciated and free for evaluation.
    pub fn add(
        &mut self,
        id: GenomeId,
        genome: G,
        parents: Option<(GenomeId, GenomeId)>,
        born_generation: Generation,
    ) -> Result<(), EvolutionError> {
        if id >= self.next_genome_id {
            return Err(EvolutionError::InvalidConfiguration(format!(
                "genome id {} was not reserved",
                id
            )));
        }
        if self.genomes.contains_key(&id) {
            return Err(EvolutionError::DuplicateGenome(id));
        }
        self.genomes.insert(
            id,
            GenomeRecord {
                id,
                genome,
                fitness: None,
                payload: None,
                parents,
                born_generation,
            },
        );
        self.unspeciated.insert(id);
        self.free.insert(id);
        Ok(())
    }

    /// Deletes a genome and discards it from every index. If it represented its
    /// species, the representative is cleared until the next speciation.
    pub fn remove(&mut self, id: GenomeId) -> Result<GenomeRecord<G, P>, EvolutionError> {
        let record = self
            .genomes
            .remove(&id)
            .ok_or_else(|| EvolutionError::genome_not_found(id))?;
        self.free.remove(&id);
        self.evaluated.remove(&id);
        self.elite.remove(&id);
        self.unspeciated.remove(&id);
        self.detach_from_species(id);
        Ok(record)
    }

    pub fn get(&self, id: GenomeId) -> Result<&G, EvolutionError> {
        self.record(id).map(|record| &record.genome)
    }

    pub fn record(&self, id: GenomeId) -> Result<&GenomeRecord<G, P>, EvolutionError> {
        self.genomes
            .get(&id)
            .ok_or_else(|| EvolutionError::genome_not_found(id))
    }

    pub fn contains(&self, id: GenomeId) -> bool {
        self.genomes.contains_key(&id)
    }

    pub fn fitness(&self, id: GenomeId) -> Result<Option<f64>, EvolutionError> {
        self.record(id).map(|record| record.fitness)
    }

    pub fn set_fitness(
        &mut self,
        id: GenomeId,
        fitness: f64,
        payload: Option<P>,
    ) -> Result<(), EvolutionError> {
        let record = self
            .genomes
            .get_mut(&id)
            .ok_or_else(|| EvolutionError::genome_not_found(id))?;
        record.fitness = Some(fitness);
        if payload.is_some() {
            record.payload = payload;
        }
        Ok(())
    }

    /// Makes a genome eligible for dispatch again.
    pub fn mark_free(&mut self, id: GenomeId) -> Result<(), EvolutionError> {
        self.ensure_alive(id)?;
        self.evaluated.remove(&id);
        self.elite.remove(&id);
        self.free.insert(id);
        Ok(())
    }

    /// Takes a genome out of `free` once it has been dispatched for evaluation.
    pub fn mark_unavailable(&mut self, id: GenomeId) -> Result<(), EvolutionError> {
        self.ensure_alive(id)?;
        self.free.remove(&id);
        Ok(())
    }

    pub fn mark_evaluated(&mut self, id: GenomeId) -> Result<(), EvolutionError> {
        self.ensure_alive(id)?;
        self.free.remove(&id);
        self.elite.remove(&id);
        self.evaluated.insert(id);
        Ok(())
    }

    /// Marks a genome as elite. An elite is no longer evaluated-for-removal.
    pub fn mark_elite(&mut self, id: GenomeId) -> Result<(), EvolutionError> {
        self.ensure_alive(id)?;
        self.free.remove(&id);
        self.evaluated.remove(&id);
        self.elite.insert(id);
        Ok(())
    }

    pub fn clear_evaluated(&mut self) {
        self.evaluated.clear();
    }

    /// Ends the elite status of every elite and returns them to `free` so they are
    /// dispatched again in the next generation.
    pub fn clear_elite(&mut self) {
        let elites = std::mem::take(&mut self.elite);
        self.free.extend(elites);
    }

    /// Creates a species whose sole member and representative is `representative`.
    pub fn create_species(
        &mut self,
        representative: GenomeId,
        generation: Generation,
    ) -> Result<SpeciesId, EvolutionError> {
        self.ensure_alive(representative)?;
        let species_id = self.next_species_id;
        self.next_species_id += 1;
        self.species
            .insert(species_id, Species::new(species_id, generation));
        self.set_representative(species_id, representative)?;
        Ok(species_id)
    }

    /// Removes a species. Any members it still has become unspeciated.
    pub fn remove_species(&mut self, species_id: SpeciesId) -> Result<Species, EvolutionError> {
        let species = self
            .species
            .remove(&species_id)
            .ok_or_else(|| EvolutionError::species_not_found(species_id))?;
        for member in species.members() {
            self.genome_to_species.remove(member);
            self.unspeciated.insert(*member);
        }
        Ok(species)
    }

    /// Moves a genome into a species, leaving any species it was in before.
    pub fn assign_to_species(
        &mut self,
        id: GenomeId,
        species_id: SpeciesId,
    ) -> Result<(), EvolutionError> {
        self.ensure_alive(id)?;
        if !self.species.contains_key(&species_id) {
            return Err(EvolutionError::species_not_found(species_id));
        }
        if self.genome_to_species.get(&id) == Some(&species_id) {
            return Ok(());
        }
        self.detach_from_species(id);
        if let Some(species) = self.species.get_mut(&species_id) {
            species.insert_member(id);
        }
        self.genome_to_species.insert(id, species_id);
        self.unspeciated.remove(&id);
        Ok(())
    }

    /// Makes `id` the representative of `species_id`, assigning it to the species
    /// first if needed.
    pub fn set_representative(
        &mut self,
        species_id: SpeciesId,
        id: GenomeId,
    ) -> Result<(), EvolutionError> {
        self.assign_to_species(id, species_id)?;
        if let Some(species) = self.species.get_mut(&species_id) {
            species.set_representative_id(Some(id));
        }
        Ok(())
    }

    /// Species of an alive genome, `None` while it is unspeciated. Fails with
    /// `NotFound` for removed or unknown ids.
    pub fn species_of(&self, id: GenomeId) -> Result<Option<SpeciesId>, EvolutionError> {
        self.ensure_alive(id)?;
        Ok(self.genome_to_species.get(&id).copied())
    }

    pub fn species(&self, species_id: SpeciesId) -> Result<&Species, EvolutionError> {
        self.species
            .get(&species_id)
            .ok_or_else(|| EvolutionError::species_not_found(species_id))
    }

    /// Mutable access to the fitness bookkeeping of a species. Membership can only
    /// change through the store.
    pub fn species_mut(&mut self, species_id: SpeciesId) -> Result<&mut Species, EvolutionError> {
        self.species
            .get_mut(&species_id)
            .ok_or_else(|| EvolutionError::species_not_found(species_id))
    }

    pub fn species_ids(&self) -> Vec<SpeciesId> {
        self.species.keys().copied().collect()
    }

    pub fn active_species_ids(&self) -> Vec<SpeciesId> {
        self.species
            .values()
            .filter(|species| species.active)
            .map(|species| species.id())
            .collect()
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    /// All members of a species, best fitness first. Unevaluated members come last;
    /// ties keep ascending id order.
    pub fn genomes_sorted_by_fitness(
        &self,
        species_id: SpeciesId,
    ) -> Result<Vec<GenomeId>, EvolutionError> {
        let species = self.species(species_id)?;
        let mut scored: Vec<(GenomeId, Option<f64>)> = species
            .members()
            .iter()
            .map(|id| (*id, self.genomes.get(id).and_then(|record| record.fitness)))
            .collect();
        scored.sort_by(|a, b| compare_fitness_desc(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    /// Evaluated members of a species, best fitness first.
    pub fn evaluated_members(
        &self,
        species_id: SpeciesId,
    ) -> Result<Vec<GenomeId>, EvolutionError> {
        Ok(self
            .genomes_sorted_by_fitness(species_id)?
            .into_iter()
            .filter(|id| self.evaluated.contains(id))
            .collect())
    }

    /// Evaluated members of a species that are not elite, best fitness first.
    pub fn dying_genomes(&self, species_id: SpeciesId) -> Result<Vec<GenomeId>, EvolutionError> {
        Ok(self
            .evaluated_members(species_id)?
            .into_iter()
            .filter(|id| !self.elite.contains(id))
            .collect())
    }

    /// Fitness values of the given genomes, skipping unevaluated ones.
    pub fn fitnesses_of(&self, ids: &[GenomeId]) -> Vec<f64> {
        ids.iter()
            .filter_map(|id| self.genomes.get(id).and_then(|record| record.fitness))
            .collect()
    }

    pub fn alive_ids(&self) -> impl Iterator<Item = GenomeId> + '_ {
        self.genomes.keys().copied()
    }

    pub fn alive_count(&self) -> usize {
        self.genomes.len()
    }

    pub fn free(&self) -> &BTreeSet<GenomeId> {
        &self.free
    }

    pub fn evaluated(&self) -> &BTreeSet<GenomeId> {
        &self.evaluated
    }

    pub fn elite(&self) -> &BTreeSet<GenomeId> {
        &self.elite
    }

    pub fn unspeciated(&self) -> &BTreeSet<GenomeId> {
        &self.unspeciated
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            alive: self.genomes.len(),
            free: self.free.len(),
            evaluated: self.evaluated.len(),
            elite: self.elite.len(),
            unspeciated: self.unspeciated.len(),
            species: self.species.len(),
        }
    }

    /// Drops every genome and species. Id counters keep running.
    pub fn reset(&mut self) {
        self.genomes.clear();
        self.free.clear();
        self.evaluated.clear();
        self.elite.clear();
        self.unspeciated.clear();
        self.species.clear();
        self.genome_to_species.clear();
    }

    fn ensure_alive(&self, id: GenomeId) -> Result<(), EvolutionError> {
        if self.genomes.contains_key(&id) {
            Ok(())
        } else {
            Err(EvolutionError::genome_not_found(id))
        }
    }

    fn detach_from_species(&mut self, id: GenomeId) {
        if let Some(previous) = self.genome_to_species.remove(&id) {
            if let Some(species) = self.species.get_mut(&previous) {
                species.remove_member(id);
            }
        }
    }
}

/// Descending order on optional fitness, `None` sorting last.
pub(crate) fn compare_fitness_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
