//! Reporting sink: fire-and-forget notifications about population progress.
//!
//! Every notable step of an advance cycle is emitted as a [PopulationEvent] through a
//! [ReportSink]. Sinks cannot fail the cycle (`record` returns nothing) and must not
//! block; implementations may log, buffer in memory, or drop events.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Generation, GenomeId, SpeciesId};

/// Fitness statistics over the genomes evaluated in one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitnessStats {
    pub evaluated: usize,
    pub best_genome_id: GenomeId,
    pub best: f64,
    pub worst: f64,
    pub mean: f64,
    pub stdev: f64,
}

impl FitnessStats {
    /// Computes statistics from `(genome id, fitness)` pairs. Returns `None` when empty.
    ///
    /// Ties on the best fitness resolve to the lowest genome id.
    pub fn from_fitnesses(scored: &[(GenomeId, f64)]) -> Option<Self> {
        let (first_id, first_fitness) = *scored.first()?;
        let mut best_genome_id = first_id;
        let mut best = first_fitness;
        let mut worst = first_fitness;
        let mut sum = 0.0;
        for &(genome_id, fitness) in scored {
            if fitness > best || (fitness == best && genome_id < best_genome_id) {
                best = fitness;
                best_genome_id = genome_id;
            }
            worst = worst.min(fitness);
            sum += fitness;
        }
        let count = scored.len() as f64;
        let mean = sum / count;
        let variance = scored
            .iter()
            .map(|(_, fitness)| (fitness - mean).powi(2))
            .sum::<f64>()
            / count;
        Some(Self {
            evaluated: scored.len(),
            best_genome_id,
            best,
            worst,
            mean,
            stdev: variance.sqrt(),
        })
    }
}

/// What one completed advance cycle did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    /// Generation number reached by this cycle.
    pub generation: Generation,
    pub population_size: usize,
    pub species_count: usize,
    pub evaluated: usize,
    pub elites: usize,
    pub offspring: usize,
    /// Genomes deleted this cycle (dying parents plus members of stagnant species).
    pub removed: usize,
    pub stagnant_species: Vec<SpeciesId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<FitnessStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A single reportable occurrence during evolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PopulationEvent {
    GenerationStarted {
        generation: Generation,
    },
    FitnessEvaluated {
        generation: Generation,
        stats: FitnessStats,
    },
    SpeciesStagnant {
        generation: Generation,
        species_id: SpeciesId,
        members: usize,
        /// `None` when the species had no evaluated members.
        fitness: Option<f64>,
    },
    CompleteExtinction {
        generation: Generation,
    },
    PopulationReset {
        generation: Generation,
        population_size: usize,
    },
    SolutionFound {
        generation: Generation,
        genome_id: GenomeId,
        fitness: f64,
    },
    GenerationEnded {
        summary: GenerationSummary,
    },
    SubmissionRejected {
        genome_id: GenomeId,
        reason: String,
    },
    Info {
        message: String,
    },
}

impl PopulationEvent {
    /// Stable snake_case name of the variant (matches the serialized `kind` tag).
    pub fn kind(&self) -> &'static str {
        match self {
            PopulationEvent::GenerationStarted { .. } => "generation_started",
            PopulationEvent::FitnessEvaluated { .. } => "fitness_evaluated",
            PopulationEvent::SpeciesStagnant { .. } => "species_stagnant",
            PopulationEvent::CompleteExtinction { .. } => "complete_extinction",
            PopulationEvent::PopulationReset { .. } => "population_reset",
            PopulationEvent::SolutionFound { .. } => "solution_found",
            PopulationEvent::GenerationEnded { .. } => "generation_ended",
            PopulationEvent::SubmissionRejected { .. } => "submission_rejected",
            PopulationEvent::Info { .. } => "info",
        }
    }
}

/// Receives population events. Must never block or panic.
pub trait ReportSink: Send + Sync {
    fn record(&self, event: &PopulationEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NoopReportSink;

impl ReportSink for NoopReportSink {
    fn record(&self, _event: &PopulationEvent) {}
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn record(&self, event: &PopulationEvent) {
        match event {
            PopulationEvent::GenerationStarted { generation } => {
                tracing::debug!(generation, "generation started");
            }
            PopulationEvent::FitnessEvaluated { generation, stats } => {
                tracing::info!(
                    generation,
                    evaluated = stats.evaluated,
                    best = stats.best,
                    mean = stats.mean,
                    worst = stats.worst,
                    "fitness evaluated"
                );
            }
            PopulationEvent::SpeciesStagnant {
                generation,
                species_id,
                members,
                ..
            } => {
                tracing::info!(generation, species_id, members, "species stagnant");
            }
            PopulationEvent::CompleteExtinction { generation } => {
                tracing::warn!(generation, "all species have gone extinct");
            }
            PopulationEvent::PopulationReset {
                generation,
                population_size,
            } => {
                tracing::warn!(generation, population_size, "population recreated");
            }
            PopulationEvent::SolutionFound {
                generation,
                genome_id,
                fitness,
            } => {
                tracing::info!(generation, genome_id, fitness, "fitness goal reached");
            }
            PopulationEvent::GenerationEnded { summary } => {
                tracing::info!(
                    generation = summary.generation,
                    population = summary.population_size,
                    species = summary.species_count,
                    offspring = summary.offspring,
                    elites = summary.elites,
                    "generation ended"
                );
            }
            PopulationEvent::SubmissionRejected { genome_id, reason } => {
                tracing::warn!(genome_id, %reason, "evaluation rejected");
            }
            PopulationEvent::Info { message } => {
                tracing::info!("{}", message);
            }
        }
    }
}

/// In-memory sink that keeps every event, for tests and inspection.
#[derive(Debug, Default)]
pub struct RecordingReportSink {
    events: RwLock<Vec<PopulationEvent>>,
}

impl RecordingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far, in order.
    pub fn events(&self) -> Vec<PopulationEvent> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded events whose [PopulationEvent::kind] equals `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

impl ReportSink for RecordingReportSink {
    fn record(&self, event: &PopulationEvent) {
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Fans one event out to several sinks.
#[derive(Clone, Default)]
pub struct ReportSinks {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReportSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for ReportSinks {
    fn record(&self, event: &PopulationEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
