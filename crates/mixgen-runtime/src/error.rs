use mixgen_evolution::EvolutionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Evolution(#[from] EvolutionError),
    #[error("evolution state lock poisoned")]
    LockPoisoned,
    #[error("evolution service is shut down")]
    ShutDown,
    #[error("blocking task failed: {0}")]
    Join(String),
    #[error("invalid setting: {0}")]
    Settings(String),
}

impl RuntimeError {
    /// The underlying engine error, if any.
    pub fn as_evolution(&self) -> Option<&EvolutionError> {
        match self {
            RuntimeError::Evolution(err) => Some(err),
            _ => None,
        }
    }
}
