//! Concurrent submission against a shared service.

use std::sync::Arc;

use mixgen_contract::{
    RecordingReportSink, ReportSink, ReportSinks, ReportedFitness, VectorGenome,
    VectorGenomeConfig,
};
use mixgen_evolution::{CycleOutcome, EvolutionConfig, EvolutionError};
use mixgen_runtime::{EvolutionService, RuntimeError, SubmissionReceipt};

type Service = EvolutionService<VectorGenome, ReportedFitness>;

fn start(pop_size: usize, evaluation_threshold: f64, sink: Arc<dyn ReportSink>) -> Service {
    let mut config = EvolutionConfig::default()
        .with_pop_size(pop_size)
        .with_seed(21)
        .with_compatibility_threshold(100.0);
    config.population.evaluation_threshold = evaluation_threshold;
    EvolutionService::start(config, VectorGenomeConfig::new(3), ReportedFitness, sink).unwrap()
}

fn cycles_in(receipt: &SubmissionReceipt) -> usize {
    match receipt {
        SubmissionReceipt::Applied { cycles, .. } => cycles
            .iter()
            .filter(|outcome| matches!(outcome, CycleOutcome::Advanced(_)))
            .count(),
        SubmissionReceipt::Queued { .. } => 0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_advance_exactly_once() -> anyhow::Result<()> {
    let sink = Arc::new(RecordingReportSink::new());
    let mirror = Arc::new(RecordingReportSink::new());
    let sinks = ReportSinks::new().with(sink.clone()).with(mirror.clone());
    let service = Arc::new(start(40, 1.0, Arc::new(sinks)));

    let mut ids = Vec::new();
    for _ in 0..40 {
        ids.push(service.request_individual_async().await?);
    }

    let mut handles = Vec::new();
    for (index, id) in ids.into_iter().enumerate() {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.submit_evaluation_async(id, index as f64).await
        }));
    }
    let mut cycles = 0;
    for handle in handles {
        cycles += cycles_in(&handle.await??);
    }
    cycles += service.flush_async().await?.len();

    assert_eq!(cycles, 1);
    assert_eq!(service.current_generation()?, 1);
    assert_eq!(service.pending_len()?, 0);
    assert_eq!(sink.count("generation_ended"), 1);
    assert_eq!(sink.count("submission_rejected"), 0);
    assert_eq!(mirror.events(), sink.events());
    assert_eq!(service.snapshot()?.counts.alive, 40);
    Ok(())
}

#[test]
fn worker_threads_drive_several_generations() {
    let sink = Arc::new(RecordingReportSink::new());
    let service = start(24, 0.5, sink.clone());

    std::thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| loop {
                if service.current_generation().unwrap() >= 3 {
                    break;
                }
                match service.request_individual() {
                    Ok(id) => {
                        let genome = service.genome(id).unwrap();
                        let fitness: f64 = genome.genes().iter().sum();
                        service.submit_evaluation(id, fitness).unwrap();
                    }
                    Err(RuntimeError::Evolution(EvolutionError::NoFreeGenome)) => {
                        std::thread::yield_now();
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            });
        }
    });
    service.flush().unwrap();

    assert!(service.current_generation().unwrap() >= 3);
    assert!(!service.is_terminal().unwrap());
    assert_eq!(sink.count("submission_rejected"), 0);
    assert!(service.best_genome().unwrap().is_some());
}
