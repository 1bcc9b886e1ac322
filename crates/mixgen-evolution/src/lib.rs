//! Mixed-generation NEAT core.
//!
//! Individuals are dispatched and scored asynchronously; the population advances only
//! once enough of it has been evaluated. This crate holds the genome store, distance
//! cache, speciation, stagnation tracking, fitness sharing, offspring allocation and
//! reproduction, plus the single-threaded [Population] engine that chains them.

pub mod allocation;
pub mod config;
pub mod distance;
pub mod error;
pub mod fitness;
pub mod population;
pub mod reproduction;
pub mod species;
pub mod stagnation;
pub mod store;

pub use allocation::{DeficitAllocator, OffspringAllocation, SpeciesQuota};
pub use config::{
    Aggregator, ElitismQuota, EvolutionConfig, PopulationConfig, ReproductionConfig,
    RoundingMode, SpeciationConfig, StagnationConfig,
};
pub use distance::DistanceCache;
pub use error::{EntityKind, EvolutionError};
pub use fitness::{FitnessAdjuster, SpeciesShare};
pub use population::{
    BestGenome, CycleOutcome, Population, PopulationSnapshot, PopulationState, SpeciesSnapshot,
};
pub use reproduction::{ReproductionPlan, Reproducer, SpawnOutcome, SpeciesPlan};
pub use species::{Speciator, Species, SpeciationOutcome};
pub use stagnation::{RemovedSpecies, SpeciesStatus, StagnationTracker};
pub use store::{GenomeRecord, GenomeStore, StoreCounts};
