//! Reference genome: a fixed-length vector of real-valued genes.
//!
//! Small enough to drive the engine in tests and demos without a NEAT encoding.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::identity::GenomeId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorGenomeConfig {
    pub length: usize,
    pub init_min: f64,
    pub init_max: f64,
    /// Per-gene probability of being perturbed by [Genome::mutate].
    pub mutation_rate: f64,
    /// Largest absolute perturbation applied to one gene.
    pub mutation_power: f64,
}

impl VectorGenomeConfig {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            init_min: -1.0,
            init_max: 1.0,
            mutation_rate: 0.2,
            mutation_power: 0.5,
        }
    }

    pub fn with_init_range(mut self, min: f64, max: f64) -> Self {
        self.init_min = min;
        self.init_max = max;
        self
    }

    pub fn with_mutation(mut self, rate: f64, power: f64) -> Self {
        self.mutation_rate = rate;
        self.mutation_power = power;
        self
    }
}

impl Default for VectorGenomeConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorGenome {
    id: GenomeId,
    genes: Vec<f64>,
}

impl VectorGenome {
    pub fn with_genes(id: GenomeId, genes: Vec<f64>) -> Self {
        Self { id, genes }
    }

    pub fn id(&self) -> GenomeId {
        self.id
    }

    pub fn genes(&self) -> &[f64] {
        &self.genes
    }
}

impl Genome for VectorGenome {
    type Config = VectorGenomeConfig;

    fn new(id: GenomeId) -> Self {
        Self {
            id,
            genes: Vec::new(),
        }
    }

    fn configure_new<R: Rng + ?Sized>(&mut self, config: &VectorGenomeConfig, rng: &mut R) {
        let (low, high) = if config.init_min <= config.init_max {
            (config.init_min, config.init_max)
        } else {
            (config.init_max, config.init_min)
        };
        self.genes = (0..config.length)
            .map(|_| rng.gen_range(low..=high))
            .collect();
    }

    fn configure_crossover<R: Rng + ?Sized>(
        &mut self,
        parent_a: &Self,
        parent_b: &Self,
        _config: &VectorGenomeConfig,
        rng: &mut R,
    ) {
        let mut genes: Vec<f64> = parent_a
            .genes
            .iter()
            .zip(parent_b.genes.iter())
            .map(|(a, b)| if rng.gen_bool(0.5) { *a } else { *b })
            .collect();
        if parent_a.genes.len() > genes.len() {
            genes.extend_from_slice(&parent_a.genes[genes.len()..]);
        }
        self.genes = genes;
    }

    fn mutate<R: Rng + ?Sized>(&mut self, config: &VectorGenomeConfig, rng: &mut R) {
        let rate = config.mutation_rate.clamp(0.0, 1.0);
        let power = config.mutation_power.abs();
        if rate == 0.0 || power == 0.0 {
            return;
        }
        for gene in &mut self.genes {
            if rng.gen_bool(rate) {
                *gene += rng.gen_range(-power..=power);
            }
        }
    }

    fn distance(&self, other: &Self, _config: &VectorGenomeConfig) -> f64 {
        let squared: f64 = self
            .genes
            .iter()
            .zip(other.genes.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        let extra = self.genes.len().abs_diff(other.genes.len()) as f64;
        squared.sqrt() + extra
    }
}
