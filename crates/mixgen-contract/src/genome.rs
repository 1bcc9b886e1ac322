//! Genome abstraction: the genetic encoding, its variation operators and its metric.

use rand::Rng;

use crate::identity::GenomeId;

/// An evolvable genetic encoding.
///
/// Implementations own every encoding detail (genes, innovation numbers, mutation
/// rates). The evolution core never looks inside; it only creates genomes, asks for
/// crossover and mutation, and compares genomes through [Genome::distance].
///
/// The random generator is always passed in so runs stay reproducible under a seed.
pub trait Genome: Clone + Send + Sync + 'static {
    /// Encoding-specific parameters shared by the whole population.
    type Config: Send + Sync + 'static;

    /// Creates an empty genome carrying `id`. It is configured by one of the
    /// `configure_*` methods before it joins the population.
    fn new(id: GenomeId) -> Self;

    /// Initializes a genome created from scratch (initial population or reset).
    fn configure_new<R: Rng + ?Sized>(&mut self, config: &Self::Config, rng: &mut R);

    /// Initializes this genome as the crossover of two parents.
    fn configure_crossover<R: Rng + ?Sized>(
        &mut self,
        parent_a: &Self,
        parent_b: &Self,
        config: &Self::Config,
        rng: &mut R,
    );

    /// Applies mutation in place.
    fn mutate<R: Rng + ?Sized>(&mut self, config: &Self::Config, rng: &mut R);

    /// Genetic distance to `other`: symmetric, non-negative, `0.0` when the encoding
    /// considers both genomes identical.
    fn distance(&self, other: &Self, config: &Self::Config) -> f64;
}
