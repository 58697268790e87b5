//! Belief-tree search engine for online POMDP planning.
//!
//! The solver grows a belief tree by Monte Carlo simulation: belief
//! nodes branch on actions through pluggable action mappings
//! (discretized bins or continuous/hybrid spaces), action nodes branch
//! on observations through pluggable observation mappings (exact or
//! threshold-clustered), and every belief is backed by particles owned
//! by a deduplicating state pool. Between decisions the tree is carried
//! forward: `step` advances the root, conditioning on the executed
//! action and the received observation, and `apply_changes` repairs the
//! tree in place when the world model mutates.
//!
//! # Example
//!
//! ```
//! use abtree_solver::heuristic::ModelHeuristic;
//! use abtree_solver::problems::Tiger;
//! use abtree_solver::{Solver, SolverConfig};
//!
//! let config = SolverConfig::with_simulations(200)
//!     .seeded(7)
//!     .particles(100)
//!     .horizon(10);
//! let mut solver = Solver::new(Tiger::default(), ModelHeuristic, config).unwrap();
//!
//! solver.improve_policy().unwrap();
//! let action = solver.recommend_action().expect("searched root");
//! println!("recommended: {action:?}");
//! ```

mod arena;
pub mod changes;
pub mod config;
pub mod heuristic;
pub mod histories;
pub mod mappings;
pub mod node;
pub mod problems;
mod search;
mod serial;
mod solver;
pub mod state_pool;
pub mod tree;

pub use changes::ChangeReport;
pub use config::{SearchBudget, SolverConfig};
pub use heuristic::{Heuristic, ModelHeuristic, RolloutHeuristic};
pub use node::{ActionNodeId, BeliefId};
pub use solver::{SearchStats, Solver, StepReport};
