//! Shared evolution service.
//!
//! [EvolutionService] wraps a [Population] so evaluators on many threads or tasks can
//! submit scores while at most one advance cycle runs at a time. A submission that
//! finds the engine busy is parked in a pending queue and returns at once; whoever holds
//! the engine drains that queue before letting go, so a parked evaluation is never lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use mixgen_contract::{
    FitnessFunction, Generation, Genome, GenomeId, NoopReportSink, PopulationEvent, ReportSink,
};
use mixgen_evolution::{
    BestGenome, CycleOutcome, EvolutionConfig, EvolutionError, Population, PopulationSnapshot,
    PopulationState,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Whether an advance cycle is running right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Advancing,
}

/// What happened to one submitted evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionReceipt {
    /// Applied by the calling thread. `cycles` lists the advance cycles run before the
    /// call returned.
    Applied {
        threshold_reached: bool,
        cycles: Vec<CycleOutcome>,
    },
    /// The engine was busy; the current holder applies the evaluation before releasing
    /// it. Rejections of queued evaluations go to the report sink.
    Queued { ticket: u64 },
}

struct PendingSubmission<P> {
    ticket: u64,
    genome_id: GenomeId,
    payload: P,
}

#[derive(Default)]
struct Drained {
    own: Option<Result<bool, EvolutionError>>,
    cycles: Vec<CycleOutcome>,
    failure: Option<EvolutionError>,
}

/// Clears the advancing flag even if the cycle panics.
struct AdvancingGuard<'a>(&'a AtomicBool);

impl Drop for AdvancingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EvolutionService<G, F, R = ChaCha8Rng>
where
    G: Genome,
    F: FitnessFunction<G>,
{
    population: Mutex<Population<G, F, R>>,
    pending: Mutex<VecDeque<PendingSubmission<F::Payload>>>,
    advancing: AtomicBool,
    shut_down: AtomicBool,
    next_ticket: AtomicU64,
    reporter: Arc<dyn ReportSink>,
}

impl<G, F> EvolutionService<G, F, ChaCha8Rng>
where
    G: Genome,
    F: FitnessFunction<G>,
{
    /// Builds the initial population and wires `reporter` into both the engine and the
    /// service.
    pub fn start(
        config: EvolutionConfig,
        genome_config: G::Config,
        fitness_function: F,
        reporter: Arc<dyn ReportSink>,
    ) -> Result<Self, RuntimeError> {
        let population = Population::new(config, genome_config, fitness_function)?
            .with_reporter(Arc::clone(&reporter));
        Ok(Self::new(population).with_reporter(reporter))
    }
}

impl<G, F, R> EvolutionService<G, F, R>
where
    G: Genome,
    F: FitnessFunction<G>,
    R: Rng,
{
    pub fn new(population: Population<G, F, R>) -> Self {
        Self {
            population: Mutex::new(population),
            pending: Mutex::new(VecDeque::new()),
            advancing: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            next_ticket: AtomicU64::new(1),
            reporter: Arc::new(NoopReportSink),
        }
    }

    /// Sink for service-level events such as rejected queued evaluations.
    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Records an evaluation without waiting for an in-flight advance cycle.
    ///
    /// When the engine is free the evaluation is applied here, together with anything
    /// queued, and an advance cycle runs if the threshold is reached. A rejection of
    /// this caller's own evaluation, or a fatal cycle error, is returned as `Err`.
    pub fn submit_evaluation(
        &self,
        genome_id: GenomeId,
        payload: F::Payload,
    ) -> Result<SubmissionReceipt, RuntimeError> {
        self.ensure_open()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.lock_pending()?.push_back(PendingSubmission {
            ticket,
            genome_id,
            payload,
        });

        let population = match self.population.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(genome_id, ticket, "engine busy, evaluation queued");
                return Ok(SubmissionReceipt::Queued { ticket });
            }
            Err(TryLockError::Poisoned(_)) => return Err(RuntimeError::LockPoisoned),
        };
        let Drained {
            own,
            cycles,
            failure,
        } = self.release(population, Some(ticket))?;
        match (own, failure) {
            (Some(Err(err)), _) | (_, Some(err)) => Err(err.into()),
            (Some(Ok(threshold_reached)), None) => Ok(SubmissionReceipt::Applied {
                threshold_reached,
                cycles,
            }),
            // Another holder drained it between the push and our lock.
            (None, None) => Ok(SubmissionReceipt::Queued { ticket }),
        }
    }

    /// Hands out the lowest-id free genome for evaluation.
    pub fn request_individual(&self) -> Result<GenomeId, RuntimeError> {
        self.ensure_open()?;
        self.with_population(|population| population.request_individual())?
            .map_err(RuntimeError::from)
    }

    /// Clone of a live genome, for shipping to an evaluator.
    pub fn genome(&self, genome_id: GenomeId) -> Result<G, RuntimeError> {
        self.with_population(|population| population.genome(genome_id).cloned())?
            .map_err(RuntimeError::from)
    }

    pub fn current_generation(&self) -> Result<Generation, RuntimeError> {
        self.with_population(|population| population.current_generation())
    }

    pub fn is_terminal(&self) -> Result<bool, RuntimeError> {
        self.with_population(|population| population.is_terminal())
    }

    pub fn population_state(&self) -> Result<PopulationState, RuntimeError> {
        self.with_population(|population| population.state().clone())
    }

    pub fn best_genome(&self) -> Result<Option<BestGenome<G>>, RuntimeError> {
        self.with_population(|population| population.best_genome().cloned())
    }

    pub fn set_evaluation_threshold(&self, fraction: f64) -> Result<(), RuntimeError> {
        self.with_population(|population| population.set_evaluation_threshold(fraction))?
            .map_err(RuntimeError::from)
    }

    pub fn snapshot(&self) -> Result<PopulationSnapshot, RuntimeError> {
        self.with_population(|population| population.snapshot())
    }

    pub fn state(&self) -> CycleState {
        if self.advancing.load(Ordering::Acquire) {
            CycleState::Advancing
        } else {
            CycleState::Idle
        }
    }

    pub fn pending_len(&self) -> Result<usize, RuntimeError> {
        Ok(self.lock_pending()?.len())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Waits for the engine, applies everything queued and runs a cycle if one is due.
    pub fn flush(&self) -> Result<Vec<CycleOutcome>, RuntimeError> {
        let mut population = self.lock_population()?;
        let mut drained = Drained::default();
        self.drain(&mut population, None, &mut drained)?;
        if population.threshold_reached() && !population.is_terminal() {
            self.advance_guarded(&mut population, &mut drained);
        }
        let mut more = self.release(population, None)?;
        if let Some(err) = drained.failure.or(more.failure) {
            return Err(err.into());
        }
        drained.cycles.append(&mut more.cycles);
        Ok(drained.cycles)
    }

    /// Stops accepting work, waits for any in-flight cycle, applies queued evaluations
    /// and returns the final snapshot.
    pub fn shutdown(&self) -> Result<PopulationSnapshot, RuntimeError> {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::info!("evolution service shutting down");
        }
        let mut population = self.lock_population()?;
        let mut drained = Drained::default();
        self.drain(&mut population, None, &mut drained)?;
        if let Some(err) = drained.failure {
            tracing::warn!(error = %err, "cycle failed while shutting down");
        }
        Ok(population.snapshot())
    }

    fn with_population<T>(
        &self,
        f: impl FnOnce(&mut Population<G, F, R>) -> T,
    ) -> Result<T, RuntimeError> {
        let mut population = self.lock_population()?;
        let value = f(&mut *population);
        let drained = self.release(population, None)?;
        if let Some(err) = drained.failure {
            tracing::error!(error = %err, "cycle triggered by queued evaluations failed");
        }
        Ok(value)
    }

    /// Drains the queue, unlocks the engine, then re-checks the queue: a submission
    /// that failed `try_lock` while we held the lock is picked up here.
    fn release<'a>(
        &'a self,
        mut population: MutexGuard<'a, Population<G, F, R>>,
        own: Option<u64>,
    ) -> Result<Drained, RuntimeError> {
        let mut drained = Drained::default();
        loop {
            self.drain(&mut population, own, &mut drained)?;
            drop(population);
            if self.lock_pending()?.is_empty() {
                return Ok(drained);
            }
            population = match self.population.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Ok(drained),
                Err(TryLockError::Poisoned(_)) => return Err(RuntimeError::LockPoisoned),
            };
        }
    }

    fn drain(
        &self,
        population: &mut Population<G, F, R>,
        own: Option<u64>,
        drained: &mut Drained,
    ) -> Result<(), RuntimeError> {
        loop {
            let batch: Vec<_> = self.lock_pending()?.drain(..).collect();
            if batch.is_empty() {
                return Ok(());
            }
            for submission in batch {
                let result = population.submit_evaluation(submission.genome_id, submission.payload);
                if Some(submission.ticket) == own {
                    drained.own = Some(result);
                } else if let Err(err) = result {
                    self.reject(submission.genome_id, &err);
                }
            }
            if population.threshold_reached() && !population.is_terminal() {
                self.advance_guarded(population, drained);
            }
        }
    }

    /// Runs one advance cycle unless one is already running.
    fn advance_guarded(&self, population: &mut Population<G, F, R>, drained: &mut Drained) {
        if self
            .advancing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("advance already in progress, trigger ignored");
            return;
        }
        let _guard = AdvancingGuard(&self.advancing);
        match population.advance() {
            Ok(outcome) => drained.cycles.push(outcome),
            Err(err) => {
                tracing::error!(
                    generation = population.current_generation(),
                    error = %err,
                    "advance cycle failed"
                );
                drained.failure = Some(err);
            }
        }
    }

    fn reject(&self, genome_id: GenomeId, err: &EvolutionError) {
        tracing::warn!(genome_id, error = %err, "queued evaluation rejected");
        self.reporter.record(&PopulationEvent::SubmissionRejected {
            genome_id,
            reason: err.to_string(),
        });
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.is_shut_down() {
            return Err(RuntimeError::ShutDown);
        }
        Ok(())
    }

    fn lock_population(&self) -> Result<MutexGuard<'_, Population<G, F, R>>, RuntimeError> {
        self.population
            .lock()
            .map_err(|_| RuntimeError::LockPoisoned)
    }

    fn lock_pending(
        &self,
    ) -> Result<MutexGuard<'_, VecDeque<PendingSubmission<F::Payload>>>, RuntimeError> {
        self.pending.lock().map_err(|_| RuntimeError::LockPoisoned)
    }
}

impl<G, F, R> EvolutionService<G, F, R>
where
    G: Genome,
    F: FitnessFunction<G> + 'static,
    R: Rng + Send + 'static,
{
    /// Async entry for [EvolutionService::submit_evaluation]. Runs on the blocking pool
    /// so an in-flight cycle never stalls the async reactor.
    pub async fn submit_evaluation_async(
        self: &Arc<Self>,
        genome_id: GenomeId,
        payload: F::Payload,
    ) -> Result<SubmissionReceipt, RuntimeError> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.submit_evaluation(genome_id, payload))
            .await
            .map_err(|e| RuntimeError::Join(e.to_string()))?
    }

    pub async fn request_individual_async(self: &Arc<Self>) -> Result<GenomeId, RuntimeError> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.request_individual())
            .await
            .map_err(|e| RuntimeError::Join(e.to_string()))?
    }

    pub async fn flush_async(self: &Arc<Self>) -> Result<Vec<CycleOutcome>, RuntimeError> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.flush())
            .await
            .map_err(|e| RuntimeError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixgen_contract::{RecordingReportSink, ReportedFitness, VectorGenome, VectorGenomeConfig};

    type TestService = EvolutionService<VectorGenome, ReportedFitness>;

    fn service(pop_size: usize) -> TestService {
        let config = EvolutionConfig::default()
            .with_pop_size(pop_size)
            .with_seed(5)
            .with_compatibility_threshold(100.0);
        EvolutionService::start(
            config,
            VectorGenomeConfig::new(3),
            ReportedFitness,
            Arc::new(NoopReportSink),
        )
        .unwrap()
    }

    fn request_all(service: &TestService) -> Vec<GenomeId> {
        let mut ids = Vec::new();
        while let Ok(id) = service.request_individual() {
            ids.push(id);
        }
        ids
    }

    #[test]
    fn free_engine_applies_and_advances_inline() {
        let service = service(4);
        let ids = request_all(&service);
        assert_eq!(ids.len(), 4);

        for id in &ids[..3] {
            let receipt = service.submit_evaluation(*id, 1.0).unwrap();
            assert_eq!(
                receipt,
                SubmissionReceipt::Applied {
                    threshold_reached: false,
                    cycles: vec![]
                }
            );
        }
        match service.submit_evaluation(ids[3], 2.0).unwrap() {
            SubmissionReceipt::Applied {
                threshold_reached,
                cycles,
            } => {
                assert!(threshold_reached);
                assert_eq!(cycles.len(), 1);
                assert!(matches!(cycles[0], CycleOutcome::Advanced(_)));
            }
            other => panic!("expected applied receipt, got {other:?}"),
        }
        assert_eq!(service.current_generation().unwrap(), 1);
        assert_eq!(service.state(), CycleState::Idle);
    }

    #[test]
    fn busy_engine_queues_without_blocking() {
        let service = service(2);
        let ids = request_all(&service);

        let held = service.population.lock().unwrap();
        for id in &ids {
            let receipt = service.submit_evaluation(*id, 1.0).unwrap();
            assert!(matches!(receipt, SubmissionReceipt::Queued { .. }));
        }
        assert_eq!(service.pending_len().unwrap(), 2);
        drop(held);

        let cycles = service.flush().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(service.pending_len().unwrap(), 0);
        assert_eq!(service.current_generation().unwrap(), 1);
    }

    #[test]
    fn queued_rejection_goes_to_the_report_sink() {
        let sink = Arc::new(RecordingReportSink::new());
        let service = service(3).with_reporter(sink.clone());

        let held = service.population.lock().unwrap();
        service.submit_evaluation(999, 1.0).unwrap();
        drop(held);

        assert!(service.flush().unwrap().is_empty());
        assert_eq!(sink.count("submission_rejected"), 1);
    }

    #[test]
    fn own_rejection_is_returned_to_the_caller() {
        let service = service(3);
        let id = service.request_individual().unwrap();
        let err = service.submit_evaluation(id, f64::NAN).unwrap_err();
        assert!(matches!(
            err.as_evolution(),
            Some(EvolutionError::Fitness { genome_id, .. }) if *genome_id == id
        ));
        assert_eq!(service.snapshot().unwrap().counts.evaluated, 0);
    }

    #[test]
    fn second_trigger_during_a_cycle_is_ignored() {
        let service = service(2);
        let ids = request_all(&service);

        service.advancing.store(true, Ordering::Release);
        assert_eq!(service.state(), CycleState::Advancing);
        assert_eq!(
            serde_json::to_string(&service.state()).unwrap(),
            "\"advancing\""
        );
        for id in &ids {
            service.submit_evaluation(*id, 1.0).unwrap();
        }
        assert_eq!(service.current_generation().unwrap(), 0);

        service.advancing.store(false, Ordering::Release);
        assert_eq!(service.flush().unwrap().len(), 1);
        assert_eq!(service.current_generation().unwrap(), 1);
    }

    #[test]
    fn shutdown_applies_queue_and_rejects_new_work() {
        let service = service(4);
        let id = service.request_individual().unwrap();

        let held = service.population.lock().unwrap();
        service.submit_evaluation(id, 3.0).unwrap();
        drop(held);

        let snapshot = service.shutdown().unwrap();
        assert_eq!(snapshot.counts.evaluated, 1);
        assert!(service.is_shut_down());
        assert!(matches!(
            service.submit_evaluation(id, 1.0),
            Err(RuntimeError::ShutDown)
        ));
        assert!(matches!(
            service.request_individual(),
            Err(RuntimeError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn async_entry_points_run_on_the_blocking_pool() {
        let service = Arc::new(service(2));
        let first = service.request_individual_async().await.unwrap();
        let second = service.request_individual_async().await.unwrap();
        service.submit_evaluation_async(first, 1.0).await.unwrap();
        let receipt = service.submit_evaluation_async(second, 2.0).await.unwrap();
        assert!(matches!(
            receipt,
            SubmissionReceipt::Applied {
                threshold_reached: true,
                ..
            }
        ));
        assert!(service.flush_async().await.unwrap().is_empty());
        assert_eq!(service.current_generation().unwrap(), 1);
    }
}
