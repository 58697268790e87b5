//! Belief and action node types.
//!
//! The tree alternates layers: belief nodes branch on actions through
//! their action mapping, action nodes branch on observations through
//! their observation mapping. Parent links are arena ids and never
//! extend a node's lifetime.

use crate::arena::ArenaId;
use crate::histories::SeqId;
use crate::mappings::{ActionMapping, ObservationMapping};
use abtree_core::Model;

/// Handle to a belief node in the tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BeliefId(pub(crate) ArenaId);

/// Handle to an action node in the tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionNodeId(pub(crate) ArenaId);

/// Reference to the history entry backing one particle of a belief.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParticleRef {
    pub seq: SeqId,
    pub entry: usize,
}

/// A node in the belief tree.
#[derive(Debug)]
pub struct BeliefNode<M: Model> {
    /// Stable id, monotonically increasing in creation order. Survives
    /// serialization and orders nodes in dumps.
    pub(crate) id: u64,
    pub(crate) depth: usize,
    /// The action node whose observation mapping owns this belief.
    pub(crate) parent: Option<ActionNodeId>,
    /// History entries currently occupying this belief.
    pub(crate) particles: Vec<ParticleRef>,
    /// Sequences whose first entry is at this belief.
    pub(crate) n_starting: i64,
    /// Sequences whose last entry is at this belief.
    pub(crate) n_ending: i64,
    /// Cached value estimate: the best visited mean Q, or the heuristic
    /// seed while nothing has been visited.
    pub(crate) value: f64,
    pub(crate) action_map: ActionMapping<M>,
}

impl<M: Model> BeliefNode<M> {
    pub(crate) fn new(
        id: u64,
        depth: usize,
        parent: Option<ActionNodeId>,
        value_seed: f64,
        action_map: ActionMapping<M>,
    ) -> Self {
        Self {
            id,
            depth,
            parent,
            particles: Vec::new(),
            n_starting: 0,
            n_ending: 0,
            value: value_seed,
            action_map,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn n_particles(&self) -> i64 {
        self.particles.len() as i64
    }

    pub fn n_starting_sequences(&self) -> i64 {
        self.n_starting
    }

    pub fn n_ending_sequences(&self) -> i64 {
        self.n_ending
    }

    /// Sequences that entered this belief through its parent edge.
    pub fn sequences_through(&self) -> i64 {
        self.n_particles() - self.n_starting
    }

    /// Cached value estimate.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn action_map(&self) -> &ActionMapping<M> {
        &self.action_map
    }

    /// Refresh the cached value from the action mapping. Leaves the
    /// heuristic seed in place while no entry has been visited.
    ///
    /// Callers other than the parent edge's sequence-count update must
    /// not invoke this: the parent's incremental total-Q bookkeeping
    /// brackets every value change with the cached old value.
    pub(crate) fn recalculate_value(&mut self) {
        if let Some(best) = self.action_map.max_visited_mean_q() {
            self.value = best;
        }
    }
}

/// The child of a belief node under one action.
#[derive(Debug)]
pub struct ActionNode<M: Model> {
    pub(crate) parent: BeliefId,
    /// Weighted count of sequences through this edge's child beliefs.
    pub(crate) n_particles: i64,
    pub(crate) total_q: f64,
    /// `total_q / n_particles`, or −∞ with zero particles.
    pub(crate) mean_q: f64,
    pub(crate) obs_map: ObservationMapping<M>,
}

impl<M: Model> ActionNode<M> {
    pub(crate) fn new(parent: BeliefId, obs_map: ObservationMapping<M>) -> Self {
        Self {
            parent,
            n_particles: 0,
            total_q: 0.0,
            mean_q: f64::NEG_INFINITY,
            obs_map,
        }
    }

    pub fn n_particles(&self) -> i64 {
        self.n_particles
    }

    pub fn total_q(&self) -> f64 {
        self.total_q
    }

    pub fn mean_q(&self) -> f64 {
        self.mean_q
    }

    pub fn obs_map(&self) -> &ObservationMapping<M> {
        &self.obs_map
    }

    pub(crate) fn recalculate(&mut self) {
        if self.n_particles > 0 {
            self.mean_q = self.total_q / self.n_particles as f64;
        } else {
            self.total_q = 0.0;
            self.mean_q = f64::NEG_INFINITY;
        }
    }
}
