use mixgen_contract::{FitnessError, Generation, GenomeId, SpeciesId};
use thiserror::Error;

/// What kind of entity a [EvolutionError::NotFound] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Genome,
    Species,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Genome => write!(f, "genome"),
            EntityKind::Species => write!(f, "species"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EvolutionError {
    /// An id was referenced after removal. Ids are never reused, so this is a bug in
    /// the caller.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: u64 },
    #[error("genome {0} is already in the store")]
    DuplicateGenome(GenomeId),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("complete extinction at generation {generation}")]
    CompleteExtinction { generation: Generation },
    #[error("species {species_id} must reproduce but has only {available} candidate parent(s)")]
    InsufficientParents {
        species_id: SpeciesId,
        available: usize,
    },
    #[error("evaluation of genome {genome_id} rejected: {source}")]
    Fitness {
        genome_id: GenomeId,
        #[source]
        source: FitnessError,
    },
    #[error("no genome is free for evaluation")]
    NoFreeGenome,
    #[error("evolution reached its fitness goal")]
    Terminated,
    #[error("evolution halted: {0}")]
    Halted(String),
}

impl EvolutionError {
    pub fn genome_not_found(id: GenomeId) -> Self {
        Self::NotFound {
            kind: EntityKind::Genome,
            id,
        }
    }

    pub fn species_not_found(id: SpeciesId) -> Self {
        Self::NotFound {
            kind: EntityKind::Species,
            id,
        }
    }

    /// Whether the error halts the run, as opposed to failing a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EvolutionError::CompleteExtinction { .. }
                | EvolutionError::InsufficientParents { .. }
                | EvolutionError::Halted(_)
        )
    }
}
