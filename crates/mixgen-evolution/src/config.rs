//! Evolution configuration.
//!
//! All sections deserialize from JSON with per-field defaults, so a config file only
//! needs the values it overrides. Every constructor that accepts an [EvolutionConfig]
//! calls [EvolutionConfig::validate] first.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EvolutionError;

/// Reduces a set of fitness values to one number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    #[default]
    Mean,
    Max,
    Min,
    Median,
}

impl Aggregator {
    /// Aggregates `values`. An empty slice yields negative infinity, which never counts
    /// as an improvement and never meets a fitness goal.
    pub fn aggregate(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NEG_INFINITY;
        }
        match self {
            Aggregator::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::Mean => "mean",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
            Aggregator::Median => "median",
        }
    }
}

impl FromStr for Aggregator {
    type Err = EvolutionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Aggregator::Mean),
            "max" => Ok(Aggregator::Max),
            "min" => Ok(Aggregator::Min),
            "median" => Ok(Aggregator::Median),
            other => Err(EvolutionError::InvalidConfiguration(format!(
                "unknown fitness aggregator '{}'. expected one of: mean, max, min, median",
                other
            ))),
        }
    }
}

/// How fractional offspring counts become integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Ties go to the even neighbour (banker's rounding).
    #[default]
    HalfEven,
    HalfAwayFromZero,
}

impl RoundingMode {
    pub fn round(&self, value: f64) -> f64 {
        match self {
            RoundingMode::HalfAwayFromZero => value.round(),
            RoundingMode::HalfEven => {
                if (value - value.trunc()).abs() == 0.5 {
                    2.0 * (value / 2.0).round()
                } else {
                    value.round()
                }
            }
        }
    }
}

/// How the elitism setting interacts with a species' offspring quota.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElitismQuota {
    /// Elites are taken out of the quota: `min(elitism, quota)`.
    #[default]
    WithinQuota,
    /// The quota is raised to at least `elitism` before elites are taken.
    ExtendQuota,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub pop_size: usize,
    /// Fraction of the alive population that must be evaluated before an advance.
    pub evaluation_threshold: f64,
    pub fitness_criterion: Aggregator,
    /// `None` disables fitness-goal termination.
    pub fitness_threshold: Option<f64>,
    pub reset_on_extinction: bool,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            pop_size: 150,
            evaluation_threshold: 1.0,
            fitness_criterion: Aggregator::Max,
            fitness_threshold: None,
            reset_on_extinction: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciationConfig {
    pub compatibility_threshold: f64,
}

impl Default for SpeciationConfig {
    fn default() -> Self {
        Self {
            compatibility_threshold: 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagnationConfig {
    pub species_fitness: Aggregator,
    pub max_stagnation: u64,
    /// Number of top species never marked stagnant.
    pub species_elitism: usize,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            species_fitness: Aggregator::Mean,
            max_stagnation: 15,
            species_elitism: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproductionConfig {
    pub elitism: usize,
    pub survival_threshold: f64,
    pub min_species_size: usize,
    pub rounding: RoundingMode,
    pub elitism_quota: ElitismQuota,
}

impl Default for ReproductionConfig {
    fn default() -> Self {
        Self {
            elitism: 0,
            survival_threshold: 0.2,
            min_species_size: 2,
            rounding: RoundingMode::HalfEven,
            elitism_quota: ElitismQuota::WithinQuota,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population: PopulationConfig,
    pub speciation: SpeciationConfig,
    pub stagnation: StagnationConfig,
    pub reproduction: ReproductionConfig,
    /// Seed for the engine's random generator. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl EvolutionConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, EvolutionError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| EvolutionError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EvolutionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EvolutionError::InvalidConfiguration(format!(
                "failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_pop_size(mut self, pop_size: usize) -> Self {
        self.population.pop_size = pop_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_elitism(mut self, elitism: usize) -> Self {
        self.reproduction.elitism = elitism;
        self
    }

    pub fn with_compatibility_threshold(mut self, threshold: f64) -> Self {
        self.speciation.compatibility_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), EvolutionError> {
        if self.population.pop_size == 0 {
            return Err(invalid("population.pop_size must be positive"));
        }
        validate_fraction(
            "population.evaluation_threshold",
            self.population.evaluation_threshold,
        )?;
        if let Some(goal) = self.population.fitness_threshold {
            if !goal.is_finite() {
                return Err(invalid("population.fitness_threshold must be finite"));
            }
        }
        let compat = self.speciation.compatibility_threshold;
        if !compat.is_finite() || compat <= 0.0 {
            return Err(invalid(
                "speciation.compatibility_threshold must be a positive finite number",
            ));
        }
        validate_fraction(
            "reproduction.survival_threshold",
            self.reproduction.survival_threshold,
        )?;
        Ok(())
    }
}

/// Checks that a fraction lies in `(0, 1]`.
pub(crate) fn validate_fraction(name: &str, value: f64) -> Result<(), EvolutionError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(EvolutionError::InvalidConfiguration(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn invalid(message: &str) -> EvolutionError {
    EvolutionError::InvalidConfiguration(message.to_string())
}
