use thiserror::Error;

/// Errors that can occur in the planner.
///
/// Per-simulation errors ([`PlannerError::EmptyBelief`],
/// [`PlannerError::ChangeUnapplicable`]) are recovered locally by the
/// solver; the remaining kinds are structural and surface to the caller.
#[derive(Error, Debug)]
pub enum PlannerError {
    /// The model broke its contract: an out-of-range bin, a missing
    /// capability for the declared space, an infinite reward, or a
    /// terminal flag on a state that kept generating transitions.
    #[error("model contract violation: {0}")]
    ModelContract(String),

    /// A tree dump was malformed or referenced an id not yet parsed.
    #[error("malformed tree dump (line {line}): {reason}")]
    SerializationMismatch { line: usize, reason: String },

    /// A belief node reached zero particles mid-simulation.
    #[error("belief node {0} has no particles")]
    EmptyBelief(u64),

    /// A model change referenced an entity unknown to the state pool.
    #[error("change not applicable: {0}")]
    ChangeUnapplicable(String),

    /// A Q-update produced NaN or an infinity from a finite model.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// A spatial query was requested but the model declared no
    /// continuous state variables.
    #[error("state not found: {0}")]
    StateNotFound(String),
}

impl PlannerError {
    /// Shorthand for a serialization failure at a known line.
    pub fn mismatch(line: usize, reason: impl Into<String>) -> Self {
        PlannerError::SerializationMismatch {
            line,
            reason: reason.into(),
        }
    }
}

/// Convenience Result type for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;
