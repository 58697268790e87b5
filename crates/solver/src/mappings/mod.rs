//! Pluggable edge storage for belief and action nodes.
//!
//! Action mappings hold the outgoing action edges of a belief node;
//! observation mappings hold the outgoing observation edges of an
//! action node. Both come in closed variants selected by the model's
//! space descriptors. Selection and serialization never iterate a hash
//! map: entries live in vectors (bin order or insertion order) and the
//! hash indexes are lookup-only.

mod approximate_obs;
mod continuous;
mod discrete_obs;
mod discretized;

pub use approximate_obs::ApproximateObservationMap;
pub use continuous::ContinuousActionMap;
pub use discrete_obs::DiscreteObservationMap;
pub use discretized::DiscretizedActionMap;

use crate::node::{ActionNodeId, BeliefId};
use abtree_core::{ActionSpace, Model, ObservationSpace, PlannerError, PlannerRng, Result};

/// Stable key under which an action entry is stored: its bin number in
/// a discretized space, or its construction-vector fingerprint in a
/// continuous one. Orders deterministically for tie-breaks and dumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKey {
    Bin(usize),
    Fingerprint(u64),
}

/// Statistics shared by every action mapping entry.
#[derive(Clone, Copy, Debug)]
pub struct EntryStats {
    pub(crate) visit_count: i64,
    pub(crate) total_q: f64,
    pub(crate) mean_q: f64,
    pub(crate) legal: bool,
    pub(crate) child: Option<ActionNodeId>,
}

impl EntryStats {
    pub(crate) fn new() -> Self {
        Self {
            visit_count: 0,
            total_q: 0.0,
            mean_q: f64::NEG_INFINITY,
            legal: false,
            child: None,
        }
    }

    /// Apply `(ΔN, ΔQ)` and report the change in visited status:
    /// `+1` if the entry just became visited, `-1` if it just became
    /// unvisited, `0` otherwise.
    pub(crate) fn update(&mut self, delta_visits: i64, delta_q: f64) -> i64 {
        let was_visited = self.visit_count > 0;
        self.visit_count += delta_visits;
        self.total_q += delta_q;
        if self.visit_count > 0 {
            self.mean_q = self.total_q / self.visit_count as f64;
        } else {
            // An unvisited entry always loses to any visited one.
            self.total_q = 0.0;
            self.mean_q = f64::NEG_INFINITY;
        }
        match (was_visited, self.visit_count > 0) {
            (false, true) => 1,
            (true, false) => -1,
            _ => 0,
        }
    }

    pub fn visit_count(&self) -> i64 {
        self.visit_count
    }

    pub fn total_q(&self) -> f64 {
        self.total_q
    }

    pub fn mean_q(&self) -> f64 {
        self.mean_q
    }

    pub fn is_legal(&self) -> bool {
        self.legal
    }

    pub fn child(&self) -> Option<ActionNodeId> {
        self.child
    }
}

/// Owned snapshot of one action entry, used by selection, the
/// recommendation rule, the chooser view, and the serializer.
#[derive(Clone, Debug)]
pub struct ActionEntryView<M: Model> {
    pub key: EntryKey,
    pub action: M::Action,
    /// Construction vector, present for continuous entries.
    pub vector: Option<Vec<f64>>,
    pub visit_count: i64,
    pub total_q: f64,
    pub mean_q: f64,
    pub legal: bool,
    pub child: Option<ActionNodeId>,
}

/// One observation edge: the routing value (or cluster representative)
/// and the child belief it leads to.
#[derive(Clone, Debug)]
pub struct ObsEntry<M: Model> {
    pub observation: M::Observation,
    pub child: BeliefId,
    pub visits: i64,
}

/// Outgoing action edges of a belief node.
#[derive(Debug)]
pub enum ActionMapping<M: Model> {
    Discretized(DiscretizedActionMap<M>),
    Continuous(ContinuousActionMap<M>),
}

impl<M: Model> ActionMapping<M> {
    /// Build the mapping variant the model's action space calls for.
    /// `particles` are the states currently backing the owning belief,
    /// used to derive the discretized bin-exploration order.
    pub fn new(model: &M, rng: &mut PlannerRng, particles: &[&M::State]) -> Result<Self> {
        match model.action_space() {
            ActionSpace::Discretized { bins } => Ok(Self::Discretized(
                DiscretizedActionMap::new(bins, model.bin_sequence(particles))?,
            )),
            ActionSpace::Continuous {
                fixed_actions,
                randomize_fixed,
            } => Ok(Self::Continuous(ContinuousActionMap::new(
                model,
                rng,
                fixed_actions,
                randomize_fixed,
            ))),
        }
    }

    /// Next untried action, or `None` once expansion is exhausted.
    pub fn next_action_to_try(
        &mut self,
        model: &M,
        rng: &mut PlannerRng,
    ) -> Result<Option<M::Action>> {
        match self {
            Self::Discretized(map) => map.next_action_to_try(model),
            Self::Continuous(map) => map.next_action_to_try(model, rng),
        }
    }

    /// UCB1 over legal visited entries, deterministic tie-break by
    /// smallest key. `None` when nothing has been visited yet.
    pub fn ucb_select(&self, coefficient: f64) -> Option<M::Action> {
        let total = self.total_visit_count();
        if total < 1 {
            return None;
        }
        let ln_total = (total as f64).ln();

        let mut best: Option<(f64, EntryKey, M::Action)> = None;
        for view in self.entry_views() {
            if !view.legal || view.visit_count <= 0 {
                continue;
            }
            let bonus = coefficient * (ln_total / view.visit_count as f64).sqrt();
            let score = view.mean_q + bonus;
            let better = match &best {
                None => true,
                Some((s, k, _)) => score > *s || (score == *s && view.key < *k),
            };
            if better {
                best = Some((score, view.key, view.action));
            }
        }
        best.map(|(_, _, a)| a)
    }

    /// The empirically best entry: highest mean Q among legal visited
    /// entries, ties broken by higher visit count, then smallest key.
    pub fn recommended(&self) -> Option<M::Action> {
        let mut best: Option<(f64, i64, EntryKey, M::Action)> = None;
        for view in self.entry_views() {
            if !view.legal || view.visit_count <= 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some((q, n, k, _)) => {
                    view.mean_q > *q
                        || (view.mean_q == *q && view.visit_count > *n)
                        || (view.mean_q == *q && view.visit_count == *n && view.key < *k)
                }
            };
            if better {
                best = Some((view.mean_q, view.visit_count, view.key, view.action));
            }
        }
        best.map(|(_, _, _, a)| a)
    }

    /// The stable key of `action` in this mapping.
    pub fn entry_key(&self, model: &M, action: &M::Action) -> Result<EntryKey> {
        match self {
            Self::Discretized(map) => map.key_of(model, action),
            Self::Continuous(map) => map.key_of(model, action),
        }
    }

    /// Statistics of `action`'s entry, if one exists.
    pub fn entry(&self, model: &M, action: &M::Action) -> Result<Option<&EntryStats>> {
        match self {
            Self::Discretized(map) => map.entry(model, action),
            Self::Continuous(map) => map.entry(model, action),
        }
    }

    /// Child action node of `action`, if one has been created.
    pub fn child_of(&self, model: &M, action: &M::Action) -> Result<Option<ActionNodeId>> {
        Ok(self.entry(model, action)?.and_then(|s| s.child))
    }

    /// Install the child action node for `action`, marking its entry
    /// legal. The entry is created if absent (continuous spaces).
    pub fn set_child(&mut self, model: &M, action: &M::Action, child: ActionNodeId) -> Result<()> {
        match self {
            Self::Discretized(map) => map.set_child(model, action, child),
            Self::Continuous(map) => map.set_child(model, action, child),
        }
    }

    /// Apply `(ΔN, ΔQ)` to `action`'s entry, maintaining the mapping
    /// aggregates.
    pub fn update_entry(
        &mut self,
        model: &M,
        action: &M::Action,
        delta_visits: i64,
        delta_q: f64,
    ) -> Result<()> {
        match self {
            Self::Discretized(map) => map.update_entry(model, action, delta_visits, delta_q),
            Self::Continuous(map) => map.update_entry(model, action, delta_visits, delta_q),
        }
    }

    /// Mark `action`'s entry legal or illegal.
    pub fn set_legal(&mut self, model: &M, action: &M::Action, legal: bool) -> Result<()> {
        match self {
            Self::Discretized(map) => map.set_legal(model, action, legal),
            Self::Continuous(map) => map.set_legal(model, action, legal),
        }
    }

    /// Highest mean Q among legal visited entries.
    pub fn max_visited_mean_q(&self) -> Option<f64> {
        self.entry_views()
            .into_iter()
            .filter(|v| v.legal && v.visit_count > 0)
            .map(|v| v.mean_q)
            .max_by(f64::total_cmp)
    }

    /// Snapshot of all materialized entries, in stable order (bin order
    /// for discretized, insertion order for continuous).
    pub fn entry_views(&self) -> Vec<ActionEntryView<M>> {
        match self {
            Self::Discretized(map) => map.entry_views(),
            Self::Continuous(map) => map.entry_views(),
        }
    }

    /// Arena ids of all child action nodes.
    pub fn children(&self) -> Vec<ActionNodeId> {
        self.entry_views().into_iter().filter_map(|v| v.child).collect()
    }

    pub fn n_children(&self) -> usize {
        match self {
            Self::Discretized(map) => map.n_children(),
            Self::Continuous(map) => map.n_children(),
        }
    }

    pub fn number_of_visited_entries(&self) -> usize {
        match self {
            Self::Discretized(map) => map.number_of_visited_entries(),
            Self::Continuous(map) => map.number_of_visited_entries(),
        }
    }

    pub fn total_visit_count(&self) -> i64 {
        match self {
            Self::Discretized(map) => map.total_visit_count(),
            Self::Continuous(map) => map.total_visit_count(),
        }
    }
}

/// Outgoing observation edges of an action node.
#[derive(Debug)]
pub enum ObservationMapping<M: Model> {
    Discrete(DiscreteObservationMap<M>),
    Approximate(ApproximateObservationMap<M>),
}

impl<M: Model> ObservationMapping<M> {
    /// Build the mapping variant the model's observation space calls
    /// for; `threshold` is the similarity bound τ for approximate
    /// spaces.
    pub fn new(model: &M, threshold: f64) -> Self {
        match model.observation_space() {
            ObservationSpace::Exact => Self::Discrete(DiscreteObservationMap::new()),
            ObservationSpace::Approximate => {
                Self::Approximate(ApproximateObservationMap::new(threshold))
            }
        }
    }

    /// Route `observation` to an existing child belief, or `None`.
    pub fn get_belief(&self, model: &M, observation: &M::Observation) -> Result<Option<BeliefId>> {
        match self {
            Self::Discrete(map) => Ok(map.get_belief(observation)),
            Self::Approximate(map) => map.get_belief(model, observation),
        }
    }

    /// Install `child` as the belief reached under `observation`. If an
    /// existing entry already routes it, that child is returned instead
    /// and `child` is not installed.
    pub fn insert_child(
        &mut self,
        model: &M,
        observation: &M::Observation,
        child: BeliefId,
    ) -> Result<BeliefId> {
        match self {
            Self::Discrete(map) => Ok(map.insert_child(observation, child)),
            Self::Approximate(map) => map.insert_child(model, observation, child),
        }
    }

    /// Adjust the visit count of the entry routing `observation`.
    pub fn update_visit_count(
        &mut self,
        model: &M,
        observation: &M::Observation,
        delta: i64,
    ) -> Result<()> {
        match self {
            Self::Discrete(map) => map.update_visit_count(observation, delta),
            Self::Approximate(map) => map.update_visit_count(model, observation, delta),
        }
    }

    /// Adjust the visit count of the entry leading to `child`.
    ///
    /// History bookkeeping uses this instead of routing by observation:
    /// in an approximate space a cluster created later can sit nearer
    /// to a recorded observation than the cluster it actually went
    /// through.
    pub fn update_visit_count_for_child(&mut self, child: BeliefId, delta: i64) -> Result<()> {
        let (entries, total) = match self {
            Self::Discrete(map) => map.parts_mut(),
            Self::Approximate(map) => map.parts_mut(),
        };
        let entry = entries
            .iter_mut()
            .find(|e| e.child == child)
            .ok_or_else(|| {
                PlannerError::ModelContract(
                    "visit update for a child this mapping does not route to".into(),
                )
            })?;
        entry.visits += delta;
        *total += delta;
        Ok(())
    }

    /// Entries in insertion (cluster-id) order.
    pub fn entries(&self) -> &[ObsEntry<M>] {
        match self {
            Self::Discrete(map) => map.entries(),
            Self::Approximate(map) => map.entries(),
        }
    }

    /// Arena ids of all child beliefs, in insertion order.
    pub fn children(&self) -> Vec<BeliefId> {
        self.entries().iter().map(|e| e.child).collect()
    }

    pub fn n_children(&self) -> usize {
        self.entries().len()
    }

    pub fn total_visit_count(&self) -> i64 {
        match self {
            Self::Discrete(map) => map.total_visit_count(),
            Self::Approximate(map) => map.total_visit_count(),
        }
    }

    /// The similarity threshold, for approximate mappings.
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::Discrete(_) => None,
            Self::Approximate(map) => Some(map.threshold()),
        }
    }
}
