//! Leaf-value estimators invoked when the tree is extended.

use crate::config::SolverConfig;
use abtree_core::{ActionSpace, Model, PlannerRng, Result};
use rand::Rng;
use std::time::{Duration, Instant};

/// Estimates the value of a state when a new leaf belief is created.
pub trait Heuristic<M: Model> {
    /// Value estimate for `state` under the current model.
    fn value(&self, model: &M, state: &M::State, rng: &mut PlannerRng) -> Result<f64>;
}

/// Delegates straight to the model's own `heuristic_value`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelHeuristic;

impl<M: Model> Heuristic<M> for ModelHeuristic {
    fn value(&self, model: &M, state: &M::State, _rng: &mut PlannerRng) -> Result<f64> {
        Ok(model.heuristic_value(state))
    }
}

/// Estimates values by random playouts.
///
/// Plays random actions from the state until termination, the depth
/// bound, or the optional time budget, accumulating discounted rewards
/// and bootstrapping the cutoff with the model's `heuristic_value`.
#[derive(Debug, Clone, Copy)]
pub struct RolloutHeuristic {
    max_depth: usize,
    timeout: Option<Duration>,
}

impl RolloutHeuristic {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            timeout: None,
        }
    }

    /// Bound each rollout by a wall-clock budget as well as by depth.
    pub fn with_timeout(max_depth: usize, timeout: Option<Duration>) -> Self {
        Self { max_depth, timeout }
    }

    /// Rollouts bounded by the configured heuristic timeout.
    pub fn from_config(max_depth: usize, config: &SolverConfig) -> Self {
        Self::with_timeout(max_depth, config.heuristic_timeout)
    }

    fn random_action<M: Model>(
        &self,
        model: &M,
        rng: &mut PlannerRng,
    ) -> Result<Option<M::Action>> {
        match model.action_space() {
            ActionSpace::Discretized { bins } => {
                if bins == 0 {
                    return Ok(None);
                }
                let bin = rng.gen_range(0..bins);
                model.sample_action(bin).map(Some)
            }
            ActionSpace::Continuous { fixed_actions, .. } => {
                if fixed_actions.is_empty() {
                    return Ok(None);
                }
                let pick = rng.gen_range(0..fixed_actions.len());
                model.construct_action(&fixed_actions[pick]).map(Some)
            }
        }
    }
}

impl<M: Model> Heuristic<M> for RolloutHeuristic {
    fn value(&self, model: &M, state: &M::State, rng: &mut PlannerRng) -> Result<f64> {
        let started = Instant::now();
        let discount = model.discount_factor();

        let mut current = state.clone();
        let mut value = 0.0;
        let mut weight = 1.0;

        for _ in 0..self.max_depth {
            if model.is_terminal(&current) {
                return Ok(value);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    break;
                }
            }
            let Some(action) = self.random_action(model, rng)? else {
                break;
            };
            let step = model.step(rng, &current, &action);
            value += weight * step.reward;
            weight *= discount;
            current = step.next_state;
            if step.terminal {
                return Ok(value);
            }
        }

        Ok(value + weight * model.heuristic_value(&current))
    }
}
