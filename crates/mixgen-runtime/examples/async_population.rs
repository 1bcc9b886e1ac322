//! Evolves real vectors toward a large gene sum with several async evaluators.
//!
//! Settings come from `MIXGEN_*` variables (see `RuntimeSettings`); the run stops at
//! the fitness goal or after `MAX_GENERATIONS`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mixgen_contract::{
    RecordingReportSink, ReportSinks, ReportedFitness, TracingReportSink, VectorGenome,
    VectorGenomeConfig,
};
use mixgen_evolution::EvolutionError;
use mixgen_runtime::{EvolutionService, RuntimeError, RuntimeSettings};
use tracing_subscriber::EnvFilter;

const EVALUATORS: usize = 8;
const MAX_GENERATIONS: u64 = 200;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,mixgen_evolution=info,mixgen_runtime=info")
        }))
        .init();

    let mut settings = RuntimeSettings::from_env()?;
    let population = &mut settings.evolution.population;
    if population.fitness_threshold.is_none() {
        population.fitness_threshold = Some(3.6);
    }
    if settings.config_path.is_none() {
        settings.evolution.speciation.compatibility_threshold = 4.0;
    }

    let genome_config = VectorGenomeConfig::new(4).with_mutation(0.3, 0.25);
    let recorder = Arc::new(RecordingReportSink::new());
    let sinks = ReportSinks::new()
        .with(Arc::new(TracingReportSink))
        .with(recorder.clone());
    let service = Arc::new(EvolutionService::start(
        settings.evolution,
        genome_config,
        ReportedFitness,
        Arc::new(sinks),
    )?);

    let mut evaluators = Vec::new();
    for worker in 0..EVALUATORS {
        let service = Arc::clone(&service);
        evaluators.push(tokio::spawn(async move { evaluate(service, worker).await }));
    }
    for evaluator in evaluators {
        evaluator.await??;
    }

    let snapshot = service.shutdown()?;
    tracing::info!(
        generation = snapshot.generation,
        species = snapshot.species.len(),
        best_fitness = ?snapshot.best_fitness,
        stagnant_species = recorder.count("species_stagnant"),
        rejected = recorder.count("submission_rejected"),
        "run finished"
    );
    if let Some(best) = service.best_genome()? {
        tracing::info!(genome_id = best.genome_id, genes = ?best.genome.genes(), "best genome");
    }
    Ok(())
}

async fn evaluate(
    service: Arc<EvolutionService<VectorGenome, ReportedFitness>>,
    worker: usize,
) -> Result<()> {
    loop {
        if service.is_terminal()? || service.current_generation()? >= MAX_GENERATIONS {
            return Ok(());
        }
        let genome_id = match service.request_individual_async().await {
            Ok(genome_id) => genome_id,
            Err(RuntimeError::Evolution(EvolutionError::NoFreeGenome)) => {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }
            Err(RuntimeError::Evolution(err)) if stops_run(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let genome = service.genome(genome_id)?;
        // Stand-in for a slow external evaluation.
        tokio::time::sleep(Duration::from_millis(2)).await;
        let fitness: f64 = genome.genes().iter().sum();
        tracing::debug!(worker, genome_id, fitness, "evaluated");
        match service.submit_evaluation_async(genome_id, fitness).await {
            Ok(_) => {}
            Err(RuntimeError::Evolution(err)) if stops_run(&err) => {
                tracing::warn!(worker, error = %err, "run stopped");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn stops_run(err: &EvolutionError) -> bool {
    err.is_fatal() || matches!(err, EvolutionError::Terminated)
}
