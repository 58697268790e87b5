//! Solver configuration parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long `improve_policy` is allowed to run per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchBudget {
    /// Run exactly this many simulations.
    Simulations(u64),
    /// Run simulations until this wall-clock deadline (milliseconds)
    /// expires. Each simulation is atomic and never interrupted.
    Millis(u64),
}

/// Solver configuration parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Override of the model's discount factor, if set.
    pub discount_factor: Option<f64>,

    /// Per-call search budget for `improve_policy`.
    pub search_budget: SearchBudget,

    /// Number of particles in the root belief.
    pub particle_count: usize,

    /// Exploration coefficient `c` in the UCB1 rule.
    pub ucb_coefficient: f64,

    /// Maximum descent depth per simulation.
    pub maximum_depth: usize,

    /// Repopulate a child belief after a step when it holds fewer
    /// particles than this.
    pub minimum_particle_count: usize,

    /// Optional per-call time budget for rollout-style heuristics.
    pub heuristic_timeout: Option<Duration>,

    /// Similarity threshold τ for approximate observation mappings.
    pub observation_threshold: f64,

    /// Seed for the planner's random number generator.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            discount_factor: None,
            search_budget: SearchBudget::Simulations(1000),
            particle_count: 1000,
            ucb_coefficient: std::f64::consts::SQRT_2,
            maximum_depth: 100,
            minimum_particle_count: 100,
            heuristic_timeout: None,
            observation_threshold: 0.1,
            seed: 42,
        }
    }
}

impl SolverConfig {
    /// Create a config with the given simulation budget per call.
    pub fn with_simulations(simulations: u64) -> Self {
        Self {
            search_budget: SearchBudget::Simulations(simulations),
            ..Default::default()
        }
    }

    /// Create a config with a per-call wall-clock deadline.
    pub fn with_deadline_millis(millis: u64) -> Self {
        Self {
            search_budget: SearchBudget::Millis(millis),
            ..Default::default()
        }
    }

    /// Set the RNG seed.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the root belief size.
    pub fn particles(mut self, count: usize) -> Self {
        self.particle_count = count;
        self.minimum_particle_count = (count / 10).max(1);
        self
    }

    /// Set the maximum descent depth.
    pub fn horizon(mut self, depth: usize) -> Self {
        self.maximum_depth = depth;
        self
    }

    /// Set the UCB exploration coefficient.
    pub fn ucb(mut self, coefficient: f64) -> Self {
        self.ucb_coefficient = coefficient;
        self
    }
}
