//! Action mapping over a continuous or hybrid action space.
//!
//! Entries are keyed by a model-supplied fingerprint of the action's
//! construction vector; vectors in the same equivalence class share one
//! entry and one child. Fixed "hybrid" actions are offered before the
//! chooser starts synthesizing new vectors.

use super::{ActionEntryView, EntryKey, EntryStats};
use crate::node::ActionNodeId;
use abtree_core::{shuffle_in_place, ActionChooser, Model, PlannerError, PlannerRng, Result};
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
struct ContinuousEntry<M: Model> {
    fingerprint: u64,
    vector: Vec<f64>,
    action: M::Action,
    stats: EntryStats,
}

/// Fingerprint-keyed action mapping with chooser-driven expansion.
#[derive(Debug)]
pub struct ContinuousActionMap<M: Model> {
    /// Entries in insertion order; selection iterates this, never the
    /// index.
    entries: Vec<ContinuousEntry<M>>,
    by_fingerprint: HashMap<u64, usize>,
    /// Untried fixed actions, offered before the chooser.
    fixed_queue: VecDeque<Vec<f64>>,
    chooser: Box<dyn ActionChooser>,
    n_children: usize,
    visited_entries: usize,
    total_visits: i64,
}

impl<M: Model> ContinuousActionMap<M> {
    pub fn new(
        model: &M,
        rng: &mut PlannerRng,
        mut fixed_actions: Vec<Vec<f64>>,
        randomize_fixed: bool,
    ) -> Self {
        if randomize_fixed {
            shuffle_in_place(&mut fixed_actions, rng);
        }
        Self {
            entries: Vec::new(),
            by_fingerprint: HashMap::new(),
            fixed_queue: fixed_actions.into(),
            chooser: model.create_chooser(),
            n_children: 0,
            visited_entries: 0,
            total_visits: 0,
        }
    }

    fn fingerprint_of(&self, model: &M, action: &M::Action) -> Result<u64> {
        let vector = model.action_construction(action).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "action {action:?} carries no construction vector in a continuous space"
            ))
        })?;
        Ok(model.construction_fingerprint(&vector))
    }

    /// Install an entry for `vector` if its fingerprint is new; either
    /// way, return the index of the entry covering it.
    fn intern(&mut self, model: &M, vector: Vec<f64>) -> Result<usize> {
        let fingerprint = model.construction_fingerprint(&vector);
        if let Some(&slot) = self.by_fingerprint.get(&fingerprint) {
            return Ok(slot);
        }
        let action = model.construct_action(&vector)?;
        let slot = self.entries.len();
        self.entries.push(ContinuousEntry {
            fingerprint,
            vector,
            action,
            stats: EntryStats::new(),
        });
        self.by_fingerprint.insert(fingerprint, slot);
        Ok(slot)
    }

    pub(super) fn key_of(&self, model: &M, action: &M::Action) -> Result<EntryKey> {
        Ok(EntryKey::Fingerprint(self.fingerprint_of(model, action)?))
    }

    /// Next untried fixed action, else a chooser proposal, else `None`.
    pub(super) fn next_action_to_try(
        &mut self,
        model: &M,
        rng: &mut PlannerRng,
    ) -> Result<Option<M::Action>> {
        while let Some(vector) = self.fixed_queue.pop_front() {
            let fingerprint = model.construction_fingerprint(&vector);
            if self.by_fingerprint.contains_key(&fingerprint) {
                continue;
            }
            let slot = self.intern(model, vector)?;
            return Ok(Some(self.entries[slot].action.clone()));
        }

        let view = self.chooser_view();
        match self.chooser.propose(&view, rng) {
            Some(vector) => {
                let slot = self.intern(model, vector)?;
                Ok(Some(self.entries[slot].action.clone()))
            }
            None => Ok(None),
        }
    }

    fn chooser_view(&self) -> Vec<abtree_core::ChooserEntry> {
        self.entries
            .iter()
            .filter(|e| e.stats.visit_count > 0)
            .map(|e| abtree_core::ChooserEntry {
                vector: e.vector.clone(),
                visit_count: e.stats.visit_count,
                mean_q: e.stats.mean_q,
            })
            .collect()
    }

    pub(super) fn entry(&self, model: &M, action: &M::Action) -> Result<Option<&EntryStats>> {
        let fingerprint = self.fingerprint_of(model, action)?;
        Ok(self
            .by_fingerprint
            .get(&fingerprint)
            .map(|&slot| &self.entries[slot].stats))
    }

    pub(super) fn set_child(
        &mut self,
        model: &M,
        action: &M::Action,
        child: ActionNodeId,
    ) -> Result<()> {
        let vector = model.action_construction(action).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "action {action:?} carries no construction vector in a continuous space"
            ))
        })?;
        let slot = self.intern(model, vector)?;
        let entry = &mut self.entries[slot];
        if entry.stats.child.is_none() {
            self.n_children += 1;
        }
        entry.stats.child = Some(child);
        entry.stats.legal = true;
        Ok(())
    }

    pub(super) fn update_entry(
        &mut self,
        model: &M,
        action: &M::Action,
        delta_visits: i64,
        delta_q: f64,
    ) -> Result<()> {
        let fingerprint = self.fingerprint_of(model, action)?;
        let slot = *self.by_fingerprint.get(&fingerprint).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "update for action {action:?} with no mapping entry"
            ))
        })?;
        let visited_delta = self.entries[slot].stats.update(delta_visits, delta_q);
        self.visited_entries = (self.visited_entries as i64 + visited_delta) as usize;
        self.total_visits += delta_visits;
        Ok(())
    }

    pub(super) fn set_legal(&mut self, model: &M, action: &M::Action, legal: bool) -> Result<()> {
        let fingerprint = self.fingerprint_of(model, action)?;
        let slot = *self.by_fingerprint.get(&fingerprint).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "legality change for action {action:?} with no mapping entry"
            ))
        })?;
        self.entries[slot].stats.legal = legal;
        Ok(())
    }

    pub(super) fn entry_views(&self) -> Vec<ActionEntryView<M>> {
        self.entries
            .iter()
            .map(|e| ActionEntryView {
                key: EntryKey::Fingerprint(e.fingerprint),
                action: e.action.clone(),
                vector: Some(e.vector.clone()),
                visit_count: e.stats.visit_count,
                total_q: e.stats.total_q,
                mean_q: e.stats.mean_q,
                legal: e.stats.legal,
                child: e.stats.child,
            })
            .collect()
    }

    pub(super) fn n_children(&self) -> usize {
        self.n_children
    }

    pub(super) fn number_of_visited_entries(&self) -> usize {
        self.visited_entries
    }

    pub(super) fn total_visit_count(&self) -> i64 {
        self.total_visits
    }

    /// Untried fixed actions, in offer order.
    pub fn remaining_fixed(&self) -> Vec<Vec<f64>> {
        self.fixed_queue.iter().cloned().collect()
    }

    /// The chooser's registry tag and current state blob.
    pub fn chooser_state(&self) -> (&'static str, String) {
        (self.chooser.tag(), self.chooser.save_state())
    }

    /// Rebuild a mapping skeleton from a tree dump.
    pub(crate) fn from_parts(
        fixed_queue: Vec<Vec<f64>>,
        chooser: Box<dyn ActionChooser>,
    ) -> Self {
        Self {
            entries: Vec::new(),
            by_fingerprint: HashMap::new(),
            fixed_queue: fixed_queue.into(),
            chooser,
            n_children: 0,
            visited_entries: 0,
            total_visits: 0,
        }
    }

    /// Rebuild one entry from a tree dump.
    pub(crate) fn restore_entry(
        &mut self,
        model: &M,
        vector: Vec<f64>,
        legal: bool,
        visit_count: i64,
        total_q: f64,
        child: Option<ActionNodeId>,
    ) -> Result<()> {
        let slot = self.intern(model, vector)?;
        let entry = &mut self.entries[slot];
        entry.stats.legal = legal;
        if child.is_some() && entry.stats.child.is_none() {
            self.n_children += 1;
        }
        entry.stats.child = child;
        let visited_delta = entry.stats.update(visit_count, total_q);
        self.visited_entries = (self.visited_entries as i64 + visited_delta) as usize;
        self.total_visits += visit_count;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use abtree_core::{ActionSpace, PerturbationChooser, PlannerRng, Step};
    use rand::SeedableRng;

    #[derive(Clone, PartialEq, Debug)]
    struct Push(f64);

    struct PushModel;

    impl Model for PushModel {
        type State = u8;
        type Action = Push;
        type Observation = u8;
        type Change = ();

        fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
            0
        }

        fn step(&self, _rng: &mut PlannerRng, _state: &u8, action: &Push) -> Step<Self> {
            Step {
                next_state: 1,
                observation: 0,
                reward: action.0,
                terminal: true,
            }
        }

        fn is_terminal(&self, state: &u8) -> bool {
            *state == 1
        }

        fn discount_factor(&self) -> f64 {
            1.0
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Continuous {
                fixed_actions: vec![vec![-1.0], vec![1.0]],
                randomize_fixed: false,
            }
        }

        fn action_construction(&self, action: &Push) -> Option<Vec<f64>> {
            Some(vec![action.0])
        }

        fn construct_action(&self, vector: &[f64]) -> Result<Push> {
            Ok(Push(vector[0]))
        }

        fn create_chooser(&self) -> Box<dyn ActionChooser> {
            Box::new(PerturbationChooser::new(1, 0.5, 2))
        }
    }

    fn new_map(seed: u64) -> (ContinuousActionMap<PushModel>, PlannerRng) {
        let mut rng = PlannerRng::seed_from_u64(seed);
        let map = ContinuousActionMap::new(
            &PushModel,
            &mut rng,
            vec![vec![-1.0], vec![1.0]],
            false,
        );
        (map, rng)
    }

    #[test]
    fn test_fixed_actions_offered_first_in_order() {
        let (mut map, mut rng) = new_map(1);
        let model = PushModel;

        assert_eq!(
            map.next_action_to_try(&model, &mut rng).unwrap(),
            Some(Push(-1.0))
        );
        assert_eq!(
            map.next_action_to_try(&model, &mut rng).unwrap(),
            Some(Push(1.0))
        );
    }

    #[test]
    fn test_chooser_takes_over_then_finishes() {
        let (mut map, mut rng) = new_map(2);
        let model = PushModel;
        map.next_action_to_try(&model, &mut rng).unwrap();
        map.next_action_to_try(&model, &mut rng).unwrap();

        // Chooser budget is 2 proposals; afterwards expansion is done.
        assert!(map.next_action_to_try(&model, &mut rng).unwrap().is_some());
        assert!(map.next_action_to_try(&model, &mut rng).unwrap().is_some());
        assert!(map.next_action_to_try(&model, &mut rng).unwrap().is_none());
    }

    #[test]
    fn test_equivalent_vectors_share_one_entry() {
        let (mut map, mut rng) = new_map(3);
        let model = PushModel;
        map.next_action_to_try(&model, &mut rng).unwrap();

        let before = map.entries.len();
        map.set_child(&model, &Push(-1.0), {
            let mut arena: Arena<()> = Arena::new();
            ActionNodeId(arena.insert(()))
        })
        .unwrap();
        assert_eq!(map.entries.len(), before);
        assert_eq!(map.n_children(), 1);
    }

    #[test]
    fn test_update_entry_requires_existing_entry() {
        let (mut map, _rng) = new_map(4);
        let model = PushModel;
        let err = map.update_entry(&model, &Push(0.25), 1, 1.0).unwrap_err();
        assert!(matches!(err, PlannerError::ModelContract(_)));
    }
}
