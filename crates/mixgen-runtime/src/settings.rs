//! Environment-driven settings for an evolution service.
//!
//! `MIXGEN_CONFIG` points at a JSON [EvolutionConfig]; the remaining variables override
//! single fields on top of it (or on top of the defaults when no file is given).

use std::collections::HashMap;

use mixgen_evolution::EvolutionConfig;

use crate::error::RuntimeError;

const ENV_KEYS: [&str; 7] = [
    "MIXGEN_CONFIG",
    "MIXGEN_POP_SIZE",
    "MIXGEN_EVAL_THRESHOLD",
    "MIXGEN_FITNESS_THRESHOLD",
    "MIXGEN_SEED",
    "MIXGEN_RESET_ON_EXTINCTION",
    "MIXGEN_COMPATIBILITY_THRESHOLD",
];

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub evolution: EvolutionConfig,
    pub config_path: Option<String>,
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self, RuntimeError> {
        let mut envs = HashMap::new();
        for key in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, RuntimeError> {
        let config_path = envs
            .get("MIXGEN_CONFIG")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let mut evolution = match &config_path {
            Some(path) => EvolutionConfig::from_path(path)?,
            None => EvolutionConfig::default(),
        };

        if let Some(pop_size) =
            parse_value::<usize>(envs, "MIXGEN_POP_SIZE", "a positive integer")?
        {
            evolution.population.pop_size = pop_size;
        }
        if let Some(threshold) =
            parse_value::<f64>(envs, "MIXGEN_EVAL_THRESHOLD", "a fraction in (0, 1]")?
        {
            evolution.population.evaluation_threshold = threshold;
        }
        if let Some(raw) = envs.get("MIXGEN_FITNESS_THRESHOLD") {
            let raw = raw.trim();
            evolution.population.fitness_threshold = match raw.to_ascii_lowercase().as_str() {
                "" | "none" | "off" => None,
                _ => Some(raw.parse::<f64>().map_err(|_| {
                    RuntimeError::Settings(format!(
                        "invalid MIXGEN_FITNESS_THRESHOLD='{}'. expected a number or 'none'",
                        raw
                    ))
                })?),
            };
        }
        if let Some(seed) = parse_value::<u64>(envs, "MIXGEN_SEED", "an unsigned integer")? {
            evolution.seed = Some(seed);
        }
        if let Some(raw) = envs.get("MIXGEN_RESET_ON_EXTINCTION") {
            evolution.population.reset_on_extinction = parse_bool(raw);
        }
        if let Some(threshold) =
            parse_value::<f64>(envs, "MIXGEN_COMPATIBILITY_THRESHOLD", "a positive number")?
        {
            evolution.speciation.compatibility_threshold = threshold;
        }

        evolution.validate()?;
        Ok(Self {
            evolution,
            config_path,
        })
    }
}

fn parse_value<T: std::str::FromStr>(
    envs: &HashMap<String, String>,
    key: &str,
    expected: &str,
) -> Result<Option<T>, RuntimeError> {
    let Some(raw) = envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(|_| {
        RuntimeError::Settings(format!("invalid {}='{}'. expected {}", key, raw, expected))
    })
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
