//! Fitness function contract.
//!
//! A fitness function turns the evaluation payload delivered for one genome (a user
//! rating, a simulator score, ...) into a scalar. It must not touch population state.

use thiserror::Error;

use crate::genome::Genome;

/// Scores a genome from the payload its evaluator sent back.
pub trait FitnessFunction<G: Genome>: Send + Sync {
    /// Evaluation data attached to the genome when it is scored.
    type Payload: Clone + Send + Sync + 'static;

    fn evaluate(&self, genome: &G, payload: &Self::Payload) -> Result<f64, FitnessError>;
}

/// Why a single evaluation was rejected. Only that submission is affected.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FitnessError {
    #[error("invalid evaluation payload: {0}")]
    InvalidPayload(String),
    #[error("fitness must be finite, got {0}")]
    NonFinite(f64),
}

/// Fitness function for evaluators that already computed a score: the payload is the
/// fitness itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReportedFitness;

impl<G: Genome> FitnessFunction<G> for ReportedFitness {
    type Payload = f64;

    fn evaluate(&self, _genome: &G, payload: &f64) -> Result<f64, FitnessError> {
        if !payload.is_finite() {
            return Err(FitnessError::NonFinite(*payload));
        }
        Ok(*payload)
    }
}
