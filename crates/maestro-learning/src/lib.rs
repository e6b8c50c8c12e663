//! Learning facilities that bias future planning.
//!
//! Two independent pieces live here:
//!
//! - [`Annealer`]: a generic simulated-annealing optimizer with strict,
//!   Boltzmann and adaptive acceptance, geometric cooling and reheating.
//! - [`PatternMemory`] and [`Learner`]: success statistics keyed by
//!   `task_type:tools`, queried by the decomposer for hints.

/// Generic simulated-annealing optimizer.
pub mod annealing;
/// Pattern-success memory and learning events.
pub mod patterns;

pub use annealing::{AcceptancePolicy, Annealer, AnnealingConfig, AnnealingOutcome, AnnealingState};
pub use patterns::{
    Learner, LearningEvent, LearningEventKind, LearningRecord, PatternHint, PatternMemory,
    PatternStats, QualityMetrics,
};
