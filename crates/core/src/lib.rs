//! abtree core - problem-model contracts and common types.
//!
//! This crate defines the narrow interface between the belief-tree
//! planner and the problems it plans for:
//!
//! - [`Model`] - the POMDP contract: generative dynamics, action and
//!   observation space descriptors, change interpretation, and text
//!   round-trip for the opaque value types
//! - [`ActionSpace`] / [`ObservationSpace`] - space descriptors
//! - [`ActionChooser`] - pluggable proposer of continuous actions
//! - [`ChangeFlags`] / [`ChangeEffect`] - world-change bookkeeping
//! - [`PlannerError`] / [`Result`] - the error surface
//!
//! All randomness in the planner flows through a single seeded
//! [`PlannerRng`], which keeps tree growth reproducible.

mod changes;
mod error;
mod model;
mod spaces;

pub use changes::{ChangeEffect, ChangeFlags};
pub use error::{PlannerError, Result};
pub use model::{Model, Step};
pub use spaces::{
    default_fingerprint, shuffle_in_place, ActionChooser, ActionSpace, ChooserEntry, NullChooser,
    ObservationSpace, PerturbationChooser,
};

/// The planner's random number generator.
///
/// A concrete ChaCha stream rather than a generic `Rng` so that results
/// are reproducible bit-for-bit across platforms for a fixed seed.
pub type PlannerRng = rand_chacha::ChaCha8Rng;
