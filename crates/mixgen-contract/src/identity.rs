//! Identity types shared by every layer.
//!
//! GenomeId is minted monotonically by the genome store and never reused; SpeciesId is
//! minted the same way by speciation; Generation counts completed advance cycles.

/// Identifies one genome for its whole lifetime.
pub type GenomeId = u64;

/// Identifies a species (a cluster around a representative genome).
pub type SpeciesId = u64;

/// Number of completed generation advances.
pub type Generation = u64;
