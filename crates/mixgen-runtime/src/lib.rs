//! Concurrent front end for the mixed-generation evolution engine.
//!
//! [EvolutionService] lets many evaluators submit scores at once while a single writer
//! runs the advance cycle; [RuntimeSettings] loads engine configuration from the
//! environment.

pub mod error;
pub mod service;
pub mod settings;

pub use error::RuntimeError;
pub use service::{CycleState, EvolutionService, SubmissionReceipt};
pub use settings::RuntimeSettings;
