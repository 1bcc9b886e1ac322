//! Collaborator contracts for the mixed-generation evolution core.
//!
//! The core only tracks genome lifecycle, species and offspring arithmetic. The genetic
//! encoding ([Genome]), scoring ([FitnessFunction]) and progress reporting ([ReportSink])
//! are supplied from outside through the traits in this crate.

pub mod fitness;
pub mod genome;
pub mod identity;
pub mod report;
pub mod vector;

pub use fitness::{FitnessError, FitnessFunction, ReportedFitness};
pub use genome::Genome;
pub use identity::{Generation, GenomeId, SpeciesId};
pub use report::{
    FitnessStats, GenerationSummary, NoopReportSink, PopulationEvent, RecordingReportSink,
    ReportSink, ReportSinks, TracingReportSink,
};
pub use vector::{VectorGenome, VectorGenomeConfig};
