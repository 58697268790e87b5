//! Observation mapping for exact (hashable) observation spaces.

use super::ObsEntry;
use crate::node::BeliefId;
use abtree_core::{Model, PlannerError, Result};
use std::collections::HashMap;

/// Hash-indexed mapping from observation to child belief.
///
/// Entries live in a vector in insertion order; the hash map is only an
/// index into it, so iteration order never depends on hashing.
#[derive(Debug)]
pub struct DiscreteObservationMap<M: Model> {
    entries: Vec<ObsEntry<M>>,
    index: HashMap<M::Observation, usize>,
    total_visits: i64,
}

impl<M: Model> DiscreteObservationMap<M> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            total_visits: 0,
        }
    }

    /// The child belief reached under `observation`, if any.
    pub fn get_belief(&self, observation: &M::Observation) -> Option<BeliefId> {
        self.index
            .get(observation)
            .map(|&slot| self.entries[slot].child)
    }

    /// Install `child` under `observation`, or return the existing
    /// child if one is already routed.
    pub fn insert_child(&mut self, observation: &M::Observation, child: BeliefId) -> BeliefId {
        if let Some(&slot) = self.index.get(observation) {
            return self.entries[slot].child;
        }
        let slot = self.entries.len();
        self.entries.push(ObsEntry {
            observation: observation.clone(),
            child,
            visits: 0,
        });
        self.index.insert(observation.clone(), slot);
        child
    }

    pub fn update_visit_count(&mut self, observation: &M::Observation, delta: i64) -> Result<()> {
        let slot = *self.index.get(observation).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "visit update for unrouted observation {observation:?}"
            ))
        })?;
        self.entries[slot].visits += delta;
        self.total_visits += delta;
        Ok(())
    }

    pub fn entries(&self) -> &[ObsEntry<M>] {
        &self.entries
    }

    pub(super) fn parts_mut(&mut self) -> (&mut [ObsEntry<M>], &mut i64) {
        (&mut self.entries, &mut self.total_visits)
    }

    pub fn total_visit_count(&self) -> i64 {
        self.total_visits
    }
}

impl<M: Model> Default for DiscreteObservationMap<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use abtree_core::{ActionSpace, PlannerRng, Step};

    struct CoinModel;

    impl Model for CoinModel {
        type State = u8;
        type Action = u8;
        type Observation = &'static str;
        type Change = ();

        fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
            0
        }

        fn step(&self, _rng: &mut PlannerRng, _state: &u8, _action: &u8) -> Step<Self> {
            Step {
                next_state: 0,
                observation: "heads",
                reward: 0.0,
                terminal: false,
            }
        }

        fn is_terminal(&self, _state: &u8) -> bool {
            false
        }

        fn discount_factor(&self) -> f64 {
            1.0
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discretized { bins: 1 }
        }
    }

    fn belief_ids(n: usize) -> Vec<BeliefId> {
        let mut arena: Arena<u8> = Arena::new();
        (0..n).map(|_| BeliefId(arena.insert(0))).collect()
    }

    #[test]
    fn test_routing_by_equality() {
        let ids = belief_ids(2);
        let mut map: DiscreteObservationMap<CoinModel> = DiscreteObservationMap::new();

        assert!(map.get_belief(&"heads").is_none());
        map.insert_child(&"heads", ids[0]);
        map.insert_child(&"tails", ids[1]);

        assert_eq!(map.get_belief(&"heads"), Some(ids[0]));
        assert_eq!(map.get_belief(&"tails"), Some(ids[1]));
    }

    #[test]
    fn test_duplicate_insert_returns_existing() {
        let ids = belief_ids(2);
        let mut map: DiscreteObservationMap<CoinModel> = DiscreteObservationMap::new();

        map.insert_child(&"heads", ids[0]);
        let routed = map.insert_child(&"heads", ids[1]);
        assert_eq!(routed, ids[0]);
        assert_eq!(map.entries().len(), 1);
    }

    #[test]
    fn test_total_matches_entry_sum() {
        let ids = belief_ids(2);
        let mut map: DiscreteObservationMap<CoinModel> = DiscreteObservationMap::new();
        map.insert_child(&"heads", ids[0]);
        map.insert_child(&"tails", ids[1]);

        map.update_visit_count(&"heads", 3).unwrap();
        map.update_visit_count(&"tails", 2).unwrap();
        map.update_visit_count(&"heads", -1).unwrap();

        let entry_sum: i64 = map.entries().iter().map(|e| e.visits).sum();
        assert_eq!(map.total_visit_count(), entry_sum);
        assert_eq!(entry_sum, 4);
    }

    #[test]
    fn test_unrouted_update_is_contract_violation() {
        let mut map: DiscreteObservationMap<CoinModel> = DiscreteObservationMap::new();
        let err = map.update_visit_count(&"heads", 1).unwrap_err();
        assert!(matches!(err, PlannerError::ModelContract(_)));
    }
}
