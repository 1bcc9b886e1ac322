//! Elitism, parent selection and offspring creation.
//!
//! Reproduction runs in two phases. [Reproducer::plan] decides elites, parent pools
//! and child counts for every species without touching the store, so a species that
//! cannot reproduce fails the cycle before anything changes. [Reproducer::spawn] then
//! applies the plan.

use mixgen_contract::{Generation, Genome, GenomeId, SpeciesId};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::allocation::SpeciesQuota;
use crate::config::{ElitismQuota, ReproductionConfig};
use crate::error::EvolutionError;
use crate::store::GenomeStore;

/// What one species does this cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeciesPlan {
    pub species_id: SpeciesId,
    /// Best evaluated members, carried over unchanged.
    pub elites: Vec<GenomeId>,
    /// Parent pool for new children, best first.
    pub parents: Vec<GenomeId>,
    pub children: usize,
    /// Evaluated members that are not elites; deleted once the cycle has spawned.
    pub dying: Vec<GenomeId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReproductionPlan {
    pub species: Vec<SpeciesPlan>,
}

impl ReproductionPlan {
    pub fn elite_count(&self) -> usize {
        self.species.iter().map(|plan| plan.elites.len()).sum()
    }

    pub fn child_count(&self) -> usize {
        self.species.iter().map(|plan| plan.children).sum()
    }

    pub fn dying(&self) -> impl Iterator<Item = GenomeId> + '_ {
        self.species
            .iter()
            .flat_map(|plan| plan.dying.iter().copied())
    }
}

/// Genomes touched by [Reproducer::spawn].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpawnOutcome {
    pub elites: Vec<GenomeId>,
    pub offspring: Vec<GenomeId>,
    pub dying: Vec<GenomeId>,
}

#[derive(Clone, Debug)]
pub struct Reproducer {
    elitism: usize,
    survival_threshold: f64,
    min_species_size: usize,
    elitism_quota: ElitismQuota,
}

impl Reproducer {
    pub fn new(config: &ReproductionConfig) -> Self {
        Self {
            elitism: config.elitism,
            survival_threshold: config.survival_threshold,
            min_species_size: config.min_species_size,
            elitism_quota: config.elitism_quota,
        }
    }

    /// Plans reproduction for every species with a quota.
    ///
    /// The parent pool is the top `max(ceil(survival_threshold * evaluated),
    /// min_species_size)` evaluated members, clamped to how many exist. Fails with
    /// `InsufficientParents` when a species has children to create but that pool holds
    /// fewer than two genomes.
    pub fn plan<G, P>(
        &self,
        store: &GenomeStore<G, P>,
        quotas: &[SpeciesQuota],
    ) -> Result<ReproductionPlan, EvolutionError> {
        let mut plan = ReproductionPlan::default();
        for quota in quotas {
            let sorted = store.evaluated_members(quota.species_id)?;
            let offspring = match self.elitism_quota {
                ElitismQuota::WithinQuota => quota.offspring,
                ElitismQuota::ExtendQuota => quota.offspring.max(self.elitism),
            };
            let elite_count = self.elitism.min(offspring).min(sorted.len());
            let children = offspring - elite_count;

            let parents = if children > 0 {
                let cutoff = ((self.survival_threshold * sorted.len() as f64).ceil() as usize)
                    .max(self.min_species_size);
                let available = cutoff.min(sorted.len());
                if available < 2 {
                    return Err(EvolutionError::InsufficientParents {
                        species_id: quota.species_id,
                        available,
                    });
                }
                sorted[..available].to_vec()
            } else {
                Vec::new()
            };

            plan.species.push(SpeciesPlan {
                species_id: quota.species_id,
                elites: sorted[..elite_count].to_vec(),
                parents,
                children,
                dying: sorted[elite_count..].to_vec(),
            });
        }
        Ok(plan)
    }

    /// Marks the planned elites and adds the planned children to the store. Dying
    /// genomes are returned, not removed, so parents stay readable until the caller
    /// deletes them.
    pub fn spawn<G: Genome, P, R: Rng + ?Sized>(
        &self,
        store: &mut GenomeStore<G, P>,
        plan: &ReproductionPlan,
        genome_config: &G::Config,
        generation: Generation,
        rng: &mut R,
    ) -> Result<SpawnOutcome, EvolutionError> {
        let mut outcome = SpawnOutcome::default();
        for species_plan in &plan.species {
            for elite in &species_plan.elites {
                store.mark_elite(*elite)?;
                outcome.elites.push(*elite);
            }
            for _ in 0..species_plan.children {
                let insufficient = || EvolutionError::InsufficientParents {
                    species_id: species_plan.species_id,
                    available: species_plan.parents.len(),
                };
                let parent_a = *species_plan.parents.choose(rng).ok_or_else(insufficient)?;
                let parent_b = *species_plan.parents.choose(rng).ok_or_else(insufficient)?;
                let child_id = store.reserve_id();
                let child = {
                    let mut child = G::new(child_id);
                    child.configure_crossover(
                        store.get(parent_a)?,
                        store.get(parent_b)?,
                        genome_config,
                        rng,
                    );
                    child.mutate(genome_config, rng);
                    child
                };
                store.add(child_id, child, Some((parent_a, parent_b)), generation)?;
                outcome.offspring.push(child_id);
            }
            outcome.dying.extend_from_slice(&species_plan.dying);
            tracing::debug!(
                species_id = species_plan.species_id,
                elites = species_plan.elites.len(),
                children = species_plan.children,
                dying = species_plan.dying.len(),
                "species reproduced"
            );
        }
        Ok(outcome)
    }

    /// Adds `count` genomes created from scratch.
    pub fn create_initial<G: Genome, P, R: Rng + ?Sized>(
        &self,
        store: &mut GenomeStore<G, P>,
        genome_config: &G::Config,
        count: usize,
        generation: Generation,
        rng: &mut R,
    ) -> Result<Vec<GenomeId>, EvolutionError> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let id = store.reserve_id();
            let mut genome = G::new(id);
            genome.configure_new(genome_config, rng);
            store.add(id, genome, None, generation)?;
            created.push(id);
        }
        Ok(created)
    }
}
