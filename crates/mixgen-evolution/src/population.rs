//! Mixed-generation population engine.
//!
//! [Population] owns the store and every pipeline component and runs the advance
//! cycle on a single thread. Evaluations trickle in through
//! [Population::submit_evaluation]; once enough of the population is scored the caller
//! runs [Population::advance]:
//!
//! statistics -> fitness goal -> stagnation -> extinction -> fitness sharing ->
//! allocation -> reproduction -> deletion of dying parents -> respeciation.
//!
//! Concurrency (reentrancy guard, non-blocking submission) lives one layer up.

use std::sync::Arc;

use chrono::Utc;
use mixgen_contract::{
    FitnessFunction, FitnessStats, Generation, GenerationSummary, Genome, GenomeId,
    NoopReportSink, PopulationEvent, ReportSink, SpeciesId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::allocation::{DeficitAllocator, OffspringAllocation};
use crate::config::{validate_fraction, EvolutionConfig};
use crate::distance::DistanceCache;
use crate::error::EvolutionError;
use crate::fitness::FitnessAdjuster;
use crate::reproduction::Reproducer;
use crate::species::Speciator;
use crate::stagnation::StagnationTracker;
use crate::store::{GenomeStore, StoreCounts};

/// Run status. Anything but `Running` rejects further work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PopulationState {
    Running,
    /// The fitness goal was reached.
    Terminated {
        generation: Generation,
        genome_id: GenomeId,
        fitness: f64,
    },
    /// A fatal condition (extinction, insufficient parents) stopped the run.
    Halted { reason: String },
}

/// Best genome observed so far, kept even after it leaves the population.
#[derive(Clone, Debug)]
pub struct BestGenome<G> {
    pub genome_id: GenomeId,
    pub fitness: f64,
    pub generation: Generation,
    pub genome: G,
}

/// What [Population::advance] did.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Nothing had been evaluated; the population is unchanged.
    NothingEvaluated,
    Advanced(GenerationSummary),
    SolutionFound {
        generation: Generation,
        genome_id: GenomeId,
        fitness: f64,
    },
    /// Every species died out and the population was recreated from scratch.
    Reset {
        generation: Generation,
        population_size: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSnapshot {
    pub species_id: SpeciesId,
    pub members: usize,
    pub representative_id: Option<GenomeId>,
    pub fitness: Option<f64>,
    pub adjusted_fitness: Option<f64>,
    pub created_generation: Generation,
    pub last_improved_generation: Generation,
}

/// Serializable overview of the population for outer layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub generation: Generation,
    pub state: PopulationState,
    pub evaluation_threshold: f64,
    pub counts: StoreCounts,
    pub species: Vec<SpeciesSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_genome_id: Option<GenomeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_fitness: Option<f64>,
    pub distance_cache_hits: u64,
    pub distance_cache_misses: u64,
}

pub struct Population<G, F, R = ChaCha8Rng>
where
    G: Genome,
    F: FitnessFunction<G>,
{
    config: EvolutionConfig,
    genome_config: G::Config,
    fitness_function: F,
    store: GenomeStore<G, F::Payload>,
    distances: DistanceCache,
    speciator: Speciator,
    stagnation: StagnationTracker,
    adjuster: FitnessAdjuster,
    allocator: Box<dyn OffspringAllocation>,
    reproducer: Reproducer,
    reporter: Arc<dyn ReportSink>,
    rng: R,
    generation: Generation,
    evaluation_threshold: f64,
    state: PopulationState,
    best: Option<BestGenome<G>>,
}

impl<G, F> Population<G, F, ChaCha8Rng>
where
    G: Genome,
    F: FitnessFunction<G>,
{
    /// Creates and speciates the initial population. The generator is seeded from
    /// `config.seed`, or from entropy when unset.
    pub fn new(
        config: EvolutionConfig,
        genome_config: G::Config,
        fitness_function: F,
    ) -> Result<Self, EvolutionError> {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::with_rng(config, genome_config, fitness_function, rng)
    }
}

impl<G, F, R> Population<G, F, R>
where
    G: Genome,
    F: FitnessFunction<G>,
    R: Rng,
{
    pub fn with_rng(
        config: EvolutionConfig,
        genome_config: G::Config,
        fitness_function: F,
        rng: R,
    ) -> Result<Self, EvolutionError> {
        config.validate()?;
        let mut population = Self {
            genome_config,
            fitness_function,
            store: GenomeStore::new(),
            distances: DistanceCache::new(),
            speciator: Speciator::new(&config.speciation),
            stagnation: StagnationTracker::new(&config.stagnation),
            adjuster: FitnessAdjuster,
            allocator: Box::new(DeficitAllocator::from_config(&config.reproduction)),
            reproducer: Reproducer::new(&config.reproduction),
            reporter: Arc::new(NoopReportSink),
            rng,
            generation: 0,
            evaluation_threshold: config.population.evaluation_threshold,
            state: PopulationState::Running,
            best: None,
            config,
        };
        population.populate_from_scratch()?;
        tracing::info!(
            population = population.store.alive_count(),
            species = population.store.species_count(),
            "initial population created"
        );
        Ok(population)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replaces the default [DeficitAllocator].
    pub fn with_allocator(mut self, allocator: Box<dyn OffspringAllocation>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Hands out the lowest-id free genome and marks it unavailable.
    pub fn request_individual(&mut self) -> Result<GenomeId, EvolutionError> {
        self.ensure_running()?;
        let genome_id = self
            .store
            .free()
            .iter()
            .next()
            .copied()
            .ok_or(EvolutionError::NoFreeGenome)?;
        self.store.mark_unavailable(genome_id)?;
        Ok(genome_id)
    }

    /// Scores a genome from its evaluation payload and marks it evaluated. Returns
    /// whether the advance threshold is now reached.
    ///
    /// A payload the fitness function rejects fails with `EvolutionError::Fitness`
    /// and leaves the population untouched.
    pub fn submit_evaluation(
        &mut self,
        genome_id: GenomeId,
        payload: F::Payload,
    ) -> Result<bool, EvolutionError> {
        self.ensure_running()?;
        let genome = self.store.get(genome_id)?;
        let fitness = self
            .fitness_function
            .evaluate(genome, &payload)
            .and_then(|fitness| {
                if fitness.is_finite() {
                    Ok(fitness)
                } else {
                    Err(mixgen_contract::FitnessError::NonFinite(fitness))
                }
            })
            .map_err(|source| EvolutionError::Fitness { genome_id, source })?;
        self.store.set_fitness(genome_id, fitness, Some(payload))?;
        self.store.mark_evaluated(genome_id)?;
        tracing::debug!(genome_id, fitness, "evaluation recorded");
        Ok(self.threshold_reached())
    }

    /// `evaluated >= evaluation_threshold * alive`, with at least one evaluation.
    pub fn threshold_reached(&self) -> bool {
        let evaluated = self.store.evaluated().len();
        evaluated > 0
            && evaluated as f64 >= self.evaluation_threshold * self.store.alive_count() as f64
    }

    pub fn evaluation_threshold(&self) -> f64 {
        self.evaluation_threshold
    }

    pub fn set_evaluation_threshold(&mut self, fraction: f64) -> Result<(), EvolutionError> {
        validate_fraction("evaluation_threshold", fraction)?;
        self.evaluation_threshold = fraction;
        Ok(())
    }

    /// Runs one advance cycle over the genomes evaluated so far.
    pub fn advance(&mut self) -> Result<CycleOutcome, EvolutionError> {
        self.ensure_running()?;
        if self.store.evaluated().is_empty() {
            return Ok(CycleOutcome::NothingEvaluated);
        }
        let started_at = Utc::now();
        let generation = self.generation;
        self.report(PopulationEvent::GenerationStarted { generation });

        let evaluated: Vec<GenomeId> = self.store.evaluated().iter().copied().collect();
        let scored: Vec<(GenomeId, f64)> = evaluated
            .iter()
            .filter_map(|id| Some((*id, self.store.fitness(*id).ok()??)))
            .collect();
        let stats = FitnessStats::from_fitnesses(&scored);
        if let Some(stats) = &stats {
            self.track_best(stats)?;
            self.report(PopulationEvent::FitnessEvaluated {
                generation,
                stats: stats.clone(),
            });
        }

        if let Some(outcome) = self.check_fitness_goal(&scored, stats.as_ref()) {
            return Ok(outcome);
        }

        let statuses = self.stagnation.update(&mut self.store, generation)?;
        for status in statuses.iter().filter(|status| status.stagnant) {
            self.report(PopulationEvent::SpeciesStagnant {
                generation,
                species_id: status.species_id,
                members: status.members,
                fitness: status.fitness.is_finite().then_some(status.fitness),
            });
        }
        let removed_species = self.stagnation.remove_stagnant(&mut self.store, &statuses)?;
        let stagnant_species: Vec<SpeciesId> =
            removed_species.iter().map(|removed| removed.species_id).collect();
        let stagnant_genomes: usize = removed_species
            .iter()
            .map(|removed| removed.removed_genomes)
            .sum();

        if self.store.active_species_ids().is_empty() {
            return self.handle_extinction(generation);
        }

        let shares = self.adjuster.adjust(&mut self.store)?;
        if !shares.is_empty() {
            let mean_adjusted = shares
                .iter()
                .map(|share| share.adjusted_fitness)
                .sum::<f64>()
                / shares.len() as f64;
            self.report(PopulationEvent::Info {
                message: format!("average adjusted fitness: {:.3}", mean_adjusted),
            });
        }
        let total_dying: usize = shares.iter().map(|share| share.dying).sum();
        let quotas = self.allocator.allocate(&shares, total_dying);
        let plan = match self.reproducer.plan(&self.store, &quotas) {
            Ok(plan) => plan,
            Err(err) => return Err(self.halt(err)),
        };

        let next_generation = generation + 1;
        let spawned = self.reproducer.spawn(
            &mut self.store,
            &plan,
            &self.genome_config,
            next_generation,
            &mut self.rng,
        )?;
        for genome_id in &spawned.dying {
            self.store.remove(*genome_id)?;
        }
        self.store.clear_evaluated();
        self.store.clear_elite();
        self.respeciate(next_generation)?;
        self.generation = next_generation;

        let summary = GenerationSummary {
            generation: next_generation,
            population_size: self.store.alive_count(),
            species_count: self.store.species_count(),
            evaluated: evaluated.len(),
            elites: spawned.elites.len(),
            offspring: spawned.offspring.len(),
            removed: spawned.dying.len() + stagnant_genomes,
            stagnant_species,
            stats,
            started_at,
            finished_at: Utc::now(),
        };
        self.report(PopulationEvent::GenerationEnded {
            summary: summary.clone(),
        });
        Ok(CycleOutcome::Advanced(summary))
    }

    pub fn current_generation(&self) -> Generation {
        self.generation
    }

    /// True once the run stopped, either by reaching its goal or by halting.
    pub fn is_terminal(&self) -> bool {
        self.state != PopulationState::Running
    }

    pub fn state(&self) -> &PopulationState {
        &self.state
    }

    pub fn best_genome(&self) -> Option<&BestGenome<G>> {
        self.best.as_ref()
    }

    pub fn genome(&self, genome_id: GenomeId) -> Result<&G, EvolutionError> {
        self.store.get(genome_id)
    }

    pub fn store(&self) -> &GenomeStore<G, F::Payload> {
        &self.store
    }

    pub fn distance_cache(&self) -> &DistanceCache {
        &self.distances
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn genome_config(&self) -> &G::Config {
        &self.genome_config
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        let species = self
            .store
            .species_ids()
            .into_iter()
            .filter_map(|species_id| self.store.species(species_id).ok())
            .map(|species| SpeciesSnapshot {
                species_id: species.id(),
                members: species.len(),
                representative_id: species.representative_id(),
                fitness: species.fitness,
                adjusted_fitness: species.adjusted_fitness,
                created_generation: species.created_generation,
                last_improved_generation: species.last_improved_generation,
            })
            .collect();
        PopulationSnapshot {
            generation: self.generation,
            state: self.state.clone(),
            evaluation_threshold: self.evaluation_threshold,
            counts: self.store.counts(),
            species,
            best_genome_id: self.best.as_ref().map(|best| best.genome_id),
            best_fitness: self.best.as_ref().map(|best| best.fitness),
            distance_cache_hits: self.distances.hits(),
            distance_cache_misses: self.distances.misses(),
        }
    }

    fn ensure_running(&self) -> Result<(), EvolutionError> {
        match &self.state {
            PopulationState::Running => Ok(()),
            PopulationState::Terminated { .. } => Err(EvolutionError::Terminated),
            PopulationState::Halted { reason } => Err(EvolutionError::Halted(reason.clone())),
        }
    }

    fn report(&self, event: PopulationEvent) {
        self.reporter.record(&event);
    }

    fn halt(&mut self, err: EvolutionError) -> EvolutionError {
        tracing::warn!(generation = self.generation, error = %err, "evolution halted");
        self.state = PopulationState::Halted {
            reason: err.to_string(),
        };
        err
    }

    fn track_best(&mut self, stats: &FitnessStats) -> Result<(), EvolutionError> {
        let improved = self
            .best
            .as_ref()
            .map_or(true, |best| stats.best > best.fitness);
        if improved {
            self.best = Some(BestGenome {
                genome_id: stats.best_genome_id,
                fitness: stats.best,
                generation: self.generation,
                genome: self.store.get(stats.best_genome_id)?.clone(),
            });
        }
        Ok(())
    }

    fn check_fitness_goal(
        &mut self,
        scored: &[(GenomeId, f64)],
        stats: Option<&FitnessStats>,
    ) -> Option<CycleOutcome> {
        let goal = self.config.population.fitness_threshold?;
        let stats = stats?;
        let fitnesses: Vec<f64> = scored.iter().map(|(_, fitness)| *fitness).collect();
        let criterion = self.config.population.fitness_criterion.aggregate(&fitnesses);
        if criterion < goal {
            return None;
        }
        let generation = self.generation;
        self.state = PopulationState::Terminated {
            generation,
            genome_id: stats.best_genome_id,
            fitness: stats.best,
        };
        self.report(PopulationEvent::SolutionFound {
            generation,
            genome_id: stats.best_genome_id,
            fitness: stats.best,
        });
        Some(CycleOutcome::SolutionFound {
            generation,
            genome_id: stats.best_genome_id,
            fitness: stats.best,
        })
    }

    fn handle_extinction(
        &mut self,
        generation: Generation,
    ) -> Result<CycleOutcome, EvolutionError> {
        self.report(PopulationEvent::CompleteExtinction { generation });
        if !self.config.population.reset_on_extinction {
            return Err(self.halt(EvolutionError::CompleteExtinction { generation }));
        }
        tracing::warn!(generation, "all species extinct, recreating population");
        self.store.reset();
        self.distances = DistanceCache::new();
        self.generation = generation + 1;
        self.populate_from_scratch()?;
        let population_size = self.store.alive_count();
        self.report(PopulationEvent::PopulationReset {
            generation: self.generation,
            population_size,
        });
        Ok(CycleOutcome::Reset {
            generation: self.generation,
            population_size,
        })
    }

    fn populate_from_scratch(&mut self) -> Result<(), EvolutionError> {
        self.reproducer.create_initial(
            &mut self.store,
            &self.genome_config,
            self.config.population.pop_size,
            self.generation,
            &mut self.rng,
        )?;
        self.respeciate(self.generation)
    }

    fn respeciate(&mut self, generation: Generation) -> Result<(), EvolutionError> {
        let outcome = self.speciator.speciate(
            &mut self.store,
            &mut self.distances,
            &self.genome_config,
            generation,
            &mut self.rng,
        )?;
        tracing::debug!(
            generation,
            species = self.store.species_count(),
            created = outcome.created.len(),
            pruned = outcome.pruned.len(),
            "population respeciated"
        );
        if let Some((mean, stdev)) = self.distances.stats() {
            self.report(PopulationEvent::Info {
                message: format!(
                    "mean genetic distance {:.3}, standard deviation {:.3}",
                    mean, stdev
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mixgen_contract::{
        RecordingReportSink, ReportedFitness, VectorGenome, VectorGenomeConfig,
    };

    use super::*;
    use crate::config::Aggregator;

    type TestPopulation = Population<VectorGenome, ReportedFitness>;

    fn config(pop_size: usize) -> EvolutionConfig {
        let mut config = EvolutionConfig::default()
            .with_pop_size(pop_size)
            .with_seed(42)
            .with_compatibility_threshold(100.0);
        config.reproduction.elitism = 1;
        config.reproduction.min_species_size = 2;
        config.population.evaluation_threshold = 1.0;
        config
    }

    fn population(config: EvolutionConfig) -> (TestPopulation, Arc<RecordingReportSink>) {
        let sink = Arc::new(RecordingReportSink::new());
        let population = Population::new(config, VectorGenomeConfig::new(3), ReportedFitness)
            .unwrap()
            .with_reporter(sink.clone());
        (population, sink)
    }

    /// Dispatches every free genome and scores it with `score(id)`.
    fn evaluate_all<G: Genome>(
        population: &mut Population<G, ReportedFitness>,
        score: impl Fn(GenomeId) -> f64,
    ) -> bool {
        let mut reached = false;
        while let Ok(id) = population.request_individual() {
            reached = population.submit_evaluation(id, score(id)).unwrap();
        }
        reached
    }

    #[test]
    fn scenario_single_species_elite_and_nine_offspring() {
        let (mut population, sink) = population(config(10));
        assert_eq!(population.store().species_count(), 1);
        let ids: Vec<GenomeId> = population.store().alive_ids().collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        let elite_genes = population.genome(10).unwrap().genes().to_vec();

        let mut reached = false;
        for id in 1..=10 {
            assert!(!reached);
            population.request_individual().unwrap();
            reached = population.submit_evaluation(id, id as f64).unwrap();
        }
        assert!(reached);

        let summary = match population.advance().unwrap() {
            CycleOutcome::Advanced(summary) => summary,
            other => panic!("expected an advanced cycle, got {other:?}"),
        };
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.elites, 1);
        assert_eq!(summary.offspring, 9);
        assert_eq!(summary.removed, 9);
        assert_eq!(summary.population_size, 10);
        assert_eq!(population.current_generation(), 1);
        assert!(population.store().evaluated().is_empty());
        assert!(population.store().elite().is_empty());
        assert!(population.store().contains(10));
        assert_eq!(population.genome(10).unwrap().genes(), elite_genes.as_slice());
        assert_eq!(population.store().free().len(), 10);
        assert!(population.store().unspeciated().is_empty());
        assert_eq!(sink.count("generation_ended"), 1);
        assert_eq!(population.best_genome().unwrap().genome_id, 10);
    }

    #[test]
    fn threshold_fraction_can_change_live() {
        let (mut population, _) = population(config(10));
        population.set_evaluation_threshold(0.5).unwrap();
        for id in 1..=4 {
            population.request_individual().unwrap();
            assert!(!population.submit_evaluation(id, 1.0).unwrap());
        }
        population.request_individual().unwrap();
        assert!(population.submit_evaluation(5, 1.0).unwrap());
        assert!(population.set_evaluation_threshold(0.0).is_err());
        assert!(population.set_evaluation_threshold(1.2).is_err());
    }

    #[test]
    fn bad_payload_rejects_only_that_submission() {
        let (mut population, _) = population(config(4));
        let id = population.request_individual().unwrap();
        let err = population.submit_evaluation(id, f64::NAN).unwrap_err();
        assert!(matches!(err, EvolutionError::Fitness { genome_id, .. } if genome_id == id));
        assert!(!population.is_terminal());
        assert!(population.store().evaluated().is_empty());
        assert!(!population.submit_evaluation(id, 2.0).unwrap());
        assert!(matches!(
            population.submit_evaluation(999, 1.0),
            Err(EvolutionError::NotFound { id: 999, .. })
        ));
    }

    #[test]
    fn request_individual_runs_dry() {
        let (mut population, _) = population(config(2));
        assert_eq!(population.request_individual().unwrap(), 1);
        assert_eq!(population.request_individual().unwrap(), 2);
        assert!(matches!(
            population.request_individual(),
            Err(EvolutionError::NoFreeGenome)
        ));
    }

    #[test]
    fn advance_without_evaluations_is_a_no_op() {
        let (mut population, _) = population(config(4));
        assert_eq!(population.advance().unwrap(), CycleOutcome::NothingEvaluated);
        assert_eq!(population.current_generation(), 0);
    }

    #[test]
    fn reaching_the_fitness_goal_terminates() {
        let mut config = config(6);
        config.population.fitness_threshold = Some(5.0);
        config.population.fitness_criterion = Aggregator::Max;
        let (mut population, sink) = population(config);
        evaluate_all(&mut population, |id| id as f64);

        let outcome = population.advance().unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::SolutionFound {
                generation: 0,
                genome_id: 6,
                fitness: 6.0
            }
        );
        assert!(population.is_terminal());
        assert!(matches!(
            population.request_individual(),
            Err(EvolutionError::Terminated)
        ));
        assert!(matches!(population.advance(), Err(EvolutionError::Terminated)));
        assert_eq!(sink.count("solution_found"), 1);
    }

    #[test]
    fn mean_criterion_can_miss_the_goal() {
        let mut config = config(6);
        config.population.fitness_threshold = Some(5.0);
        config.population.fitness_criterion = Aggregator::Mean;
        let (mut population, _) = population(config);
        evaluate_all(&mut population, |id| id as f64);
        assert!(matches!(population.advance().unwrap(), CycleOutcome::Advanced(_)));
        assert!(!population.is_terminal());
    }

    /// Genome whose cluster is fixed by id parity and inherited from the first parent.
    /// Genomes in different clusters are far apart, so there are always two species.
    #[derive(Clone, Debug)]
    struct ClusterGenome {
        cluster: u64,
    }

    impl Genome for ClusterGenome {
        type Config = ();

        fn new(id: GenomeId) -> Self {
            Self { cluster: id % 2 }
        }

        fn configure_new<R: Rng + ?Sized>(&mut self, _config: &(), _rng: &mut R) {}

        fn configure_crossover<R: Rng + ?Sized>(
            &mut self,
            parent_a: &Self,
            _parent_b: &Self,
            _config: &(),
            _rng: &mut R,
        ) {
            self.cluster = parent_a.cluster;
        }

        fn mutate<R: Rng + ?Sized>(&mut self, _config: &(), _rng: &mut R) {}

        fn distance(&self, other: &Self, _config: &()) -> f64 {
            if self.cluster == other.cluster {
                0.0
            } else {
                10.0
            }
        }
    }

    fn clustered_population(
        reset_on_extinction: bool,
    ) -> (
        Population<ClusterGenome, ReportedFitness>,
        Arc<RecordingReportSink>,
    ) {
        let mut config = config(8).with_compatibility_threshold(3.0);
        config.stagnation.max_stagnation = 0;
        config.stagnation.species_elitism = 0;
        config.population.reset_on_extinction = reset_on_extinction;
        let sink = Arc::new(RecordingReportSink::new());
        let population = Population::new(config, (), ReportedFitness)
            .unwrap()
            .with_reporter(sink.clone());
        (population, sink)
    }

    #[test]
    fn cluster_genomes_form_two_species() {
        let (mut population, _) = clustered_population(false);
        assert_eq!(population.store().species_count(), 2);
        evaluate_all(&mut population, |_| 1.0);
        population.advance().unwrap();
        assert_eq!(population.store().species_count(), 2);
        assert_eq!(population.store().alive_count(), 8);
    }

    #[test]
    fn lone_parent_halts_the_run_before_touching_the_store() {
        let config = config(8).with_compatibility_threshold(3.0);
        let sink = Arc::new(RecordingReportSink::new());
        let mut population = Population::<ClusterGenome, ReportedFitness>::new(
            config,
            (),
            ReportedFitness,
        )
        .unwrap()
        .with_reporter(sink.clone());
        let id = population.request_individual().unwrap();
        population.submit_evaluation(id, 2.0).unwrap();
        let species_id = population.store().species_of(id).unwrap().unwrap();

        let err = population.advance().unwrap_err();

        assert!(matches!(
            err,
            EvolutionError::InsufficientParents { species_id: s, available: 1 }
                if s == species_id
        ));
        match population.state() {
            PopulationState::Halted { reason } => assert_eq!(reason, &err.to_string()),
            other => panic!("expected a halted run, got {other:?}"),
        }
        assert!(population.is_terminal());
        assert_eq!(population.current_generation(), 0);
        assert!(population.store().elite().is_empty());
        assert_eq!(population.store().alive_count(), 8);
        assert_eq!(population.store().alive_ids().max(), Some(8));
        assert!(population.store().evaluated().contains(&id));
        assert_eq!(sink.count("generation_ended"), 0);
        assert!(matches!(population.advance(), Err(EvolutionError::Halted(_))));
    }

    #[test]
    fn extinction_is_raised_exactly_once() {
        let (mut population, sink) = clustered_population(false);
        evaluate_all(&mut population, |_| 1.0);
        assert!(matches!(population.advance().unwrap(), CycleOutcome::Advanced(_)));

        evaluate_all(&mut population, |_| 1.0);
        let err = population.advance().unwrap_err();
        assert!(matches!(err, EvolutionError::CompleteExtinction { generation: 1 }));

        assert!(matches!(population.advance(), Err(EvolutionError::Halted(_))));
        assert!(matches!(
            population.submit_evaluation(1, 1.0),
            Err(EvolutionError::Halted(_))
        ));
        assert!(population.is_terminal());
        assert_eq!(sink.count("species_stagnant"), 2);
        assert_eq!(sink.count("complete_extinction"), 1);
    }

    #[test]
    fn extinction_with_reset_recreates_population() {
        let (mut population, sink) = clustered_population(true);
        evaluate_all(&mut population, |_| 1.0);
        population.advance().unwrap();
        let highest_before = population.store().alive_ids().max().unwrap();

        evaluate_all(&mut population, |_| 1.0);
        let outcome = population.advance().unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Reset {
                generation: 2,
                population_size: 8
            }
        );
        assert!(!population.is_terminal());
        assert!(population.store().alive_ids().all(|id| id > highest_before));
        assert_eq!(population.store().free().len(), 8);
        assert_eq!(sink.count("population_reset"), 1);
    }

    #[test]
    fn best_genome_survives_its_death() {
        let (mut population, _) = population(config(6));
        evaluate_all(&mut population, |id| if id == 3 { 50.0 } else { 1.0 });
        population.advance().unwrap();
        evaluate_all(&mut population, |_| 0.5);
        population.advance().unwrap();
        let best = population.best_genome().unwrap();
        assert_eq!(best.genome_id, 3);
        assert_eq!(best.fitness, 50.0);
        assert_eq!(best.generation, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let (population, _) = population(config(5));
        let snapshot = population.snapshot();
        assert_eq!(snapshot.counts.alive, 5);
        assert_eq!(snapshot.species.len(), 1);
        assert_eq!(snapshot.state, PopulationState::Running);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"]["status"], "running");
        assert!(value.get("best_genome_id").is_none());
    }

    #[test]
    fn invalid_configuration_fails_construction() {
        let result = Population::<VectorGenome, ReportedFitness>::new(
            EvolutionConfig::default().with_pop_size(0),
            VectorGenomeConfig::new(2),
            ReportedFitness,
        );
        assert!(matches!(result, Err(EvolutionError::InvalidConfiguration(_))));
    }
}
