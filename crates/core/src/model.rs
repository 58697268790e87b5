//! The problem-model contract consumed by the planner.

use crate::changes::ChangeEffect;
use crate::error::{PlannerError, Result};
use crate::spaces::{
    default_fingerprint, ActionChooser, ActionSpace, NullChooser, ObservationSpace,
};
use crate::PlannerRng;
use std::fmt::Debug;
use std::hash::Hash;

/// Result of stepping the model forward by one action.
#[derive(Debug, Clone)]
pub struct Step<M: Model + ?Sized> {
    /// The state after the transition.
    pub next_state: M::State,
    /// The observation received.
    pub observation: M::Observation,
    /// The immediate reward.
    pub reward: f64,
    /// Whether `next_state` is terminal.
    pub terminal: bool,
}

/// A POMDP problem definition.
///
/// This trait is the only thing the planner knows about the world: the
/// generative dynamics, the shape of the action and observation spaces,
/// how model changes map onto affected states, and how to print and
/// parse the opaque value types for tree dumps.
///
/// Formatted state/action/observation text must be a single line and
/// must not contain double quotes; the dump format wraps it in quotes.
pub trait Model: Sized {
    /// A sampled world state. Equality and hashing must be structural
    /// and stable; states containing floats should compare and hash by
    /// bit pattern.
    type State: Clone + PartialEq + Eq + Hash + Debug;

    /// An action. Carries a bin number or a construction vector
    /// depending on the action space (see [`action_bin`] and
    /// [`action_construction`]).
    ///
    /// [`action_bin`]: Model::action_bin
    /// [`action_construction`]: Model::action_construction
    type Action: Clone + PartialEq + Debug;

    /// An observation, compared by equality in exact spaces and by
    /// [`observation_distance`](Model::observation_distance) in
    /// approximate ones.
    type Observation: Clone + PartialEq + Eq + Hash + Debug;

    /// A description of one world mutation, interpreted by
    /// [`apply_change`](Model::apply_change).
    type Change: Clone + Debug;

    /* ----------------------------- dynamics ----------------------------- */

    /// Draw a state from the initial belief.
    fn sample_initial_state(&self, rng: &mut PlannerRng) -> Self::State;

    /// Generate one transition from `state` under `action`.
    fn step(&self, rng: &mut PlannerRng, state: &Self::State, action: &Self::Action) -> Step<Self>;

    /// Whether `state` admits no further transitions.
    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Whether `state` is still a legal world state. States invalidated
    /// by a model change cause their sequences to be repaired or
    /// deleted.
    fn is_valid(&self, _state: &Self::State) -> bool {
        true
    }

    /// A cheap value estimate for `state`, used to seed leaf beliefs.
    fn heuristic_value(&self, _state: &Self::State) -> f64 {
        0.0
    }

    /// Backup discount γ, in `(0, 1]`.
    fn discount_factor(&self) -> f64;

    /* --------------------------- action space --------------------------- */

    /// Describe the action space.
    fn action_space(&self) -> ActionSpace;

    /// The bin a discretized action belongs to.
    fn action_bin(&self, _action: &Self::Action) -> Option<usize> {
        None
    }

    /// Sample the representative action of a bin.
    fn sample_action(&self, bin: usize) -> Result<Self::Action> {
        Err(PlannerError::ModelContract(format!(
            "model cannot sample discretized actions (bin {bin} requested)"
        )))
    }

    /// The order in which untried bins should be explored at a belief
    /// whose particles are given. Bins omitted here are treated as
    /// illegal at that belief unless marked legal later.
    fn bin_sequence(&self, _particles: &[&Self::State]) -> Vec<usize> {
        match self.action_space() {
            ActionSpace::Discretized { bins } => (0..bins).collect(),
            ActionSpace::Continuous { .. } => Vec::new(),
        }
    }

    /// The construction vector a continuous action was built from.
    fn action_construction(&self, _action: &Self::Action) -> Option<Vec<f64>> {
        None
    }

    /// Build an action from a construction vector.
    fn construct_action(&self, vector: &[f64]) -> Result<Self::Action> {
        Err(PlannerError::ModelContract(format!(
            "model cannot construct continuous actions (vector {vector:?} requested)"
        )))
    }

    /// Equivalence-class key for a construction vector. Vectors with
    /// equal fingerprints share one mapping entry.
    fn construction_fingerprint(&self, vector: &[f64]) -> u64 {
        default_fingerprint(vector)
    }

    /// Chooser driving expansion of a continuous action mapping.
    fn create_chooser(&self) -> Box<dyn ActionChooser> {
        Box::new(NullChooser)
    }

    /// Rebuild a chooser from its serialized tag and state blob.
    fn restore_chooser(&self, tag: &str, _state: &str) -> Result<Box<dyn ActionChooser>> {
        if tag == "null" {
            Ok(Box::new(NullChooser))
        } else {
            Err(PlannerError::ModelContract(format!(
                "unknown chooser tag {tag:?}"
            )))
        }
    }

    /* ------------------------- observation space ------------------------ */

    /// Describe the observation space.
    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::Exact
    }

    /// Distance between two observations, required for approximate
    /// spaces. `None` from a model that declared an approximate space
    /// is a contract violation.
    fn observation_distance(&self, _a: &Self::Observation, _b: &Self::Observation) -> Option<f64> {
        None
    }

    /* ----------------------- spatial state projection -------------------- */

    /// Number of continuous state variables, or `None` when states have
    /// no spatial projection (spatial queries are then unavailable).
    fn state_variable_count(&self) -> Option<usize> {
        None
    }

    /// Project a state onto its continuous coordinates. Must return
    /// [`state_variable_count`](Model::state_variable_count) values.
    fn state_coordinates(&self, _state: &Self::State) -> Vec<f64> {
        Vec::new()
    }

    /* ------------------------------ changes ------------------------------ */

    /// Mutate the model according to `change` and report what it
    /// affects. The default rejects all changes.
    fn apply_change(&mut self, change: &Self::Change) -> Result<ChangeEffect> {
        Err(PlannerError::ChangeUnapplicable(format!(
            "model does not support changes ({change:?})"
        )))
    }

    /* --------------------------- text round-trip ------------------------- */

    /// Render a state for tree dumps. One line, no double quotes.
    fn format_state(&self, state: &Self::State) -> String {
        format!("{state:?}")
    }

    /// Parse a state rendered by [`format_state`](Model::format_state).
    fn parse_state(&self, text: &str) -> Result<Self::State> {
        Err(PlannerError::mismatch(
            0,
            format!("model cannot parse states ({text:?})"),
        ))
    }

    /// Render an action for tree dumps. One line, no double quotes.
    fn format_action(&self, action: &Self::Action) -> String {
        format!("{action:?}")
    }

    /// Parse an action rendered by [`format_action`](Model::format_action).
    fn parse_action(&self, text: &str) -> Result<Self::Action> {
        Err(PlannerError::mismatch(
            0,
            format!("model cannot parse actions ({text:?})"),
        ))
    }

    /// Render an observation for tree dumps. One line, no double quotes.
    fn format_observation(&self, observation: &Self::Observation) -> String {
        format!("{observation:?}")
    }

    /// Parse an observation rendered by
    /// [`format_observation`](Model::format_observation).
    fn parse_observation(&self, text: &str) -> Result<Self::Observation> {
        Err(PlannerError::mismatch(
            0,
            format!("model cannot parse observations ({text:?})"),
        ))
    }
}
