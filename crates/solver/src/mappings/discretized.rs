//! Action mapping over a fixed number of discretized bins.

use super::{ActionEntryView, EntryKey, EntryStats};
use crate::node::ActionNodeId;
use abtree_core::{Model, PlannerError, Result};
use std::collections::VecDeque;

#[derive(Debug)]
struct DiscretizedEntry<M: Model> {
    bin: usize,
    /// Representative action, sampled on first try and kept thereafter.
    action: Option<M::Action>,
    stats: EntryStats,
}

/// One entry per bin; a queue of not-yet-tried bins drives expansion in
/// the problem-defined order before bandit selection takes over.
#[derive(Debug)]
pub struct DiscretizedActionMap<M: Model> {
    entries: Vec<DiscretizedEntry<M>>,
    bin_queue: VecDeque<usize>,
    n_children: usize,
    visited_entries: usize,
    total_visits: i64,
}

impl<M: Model> DiscretizedActionMap<M> {
    /// Create a mapping with `bins` entries and the given exploration
    /// order. Out-of-range bins in the sequence are a model contract
    /// violation.
    pub fn new(bins: usize, bin_sequence: Vec<usize>) -> Result<Self> {
        let mut bin_queue = VecDeque::with_capacity(bin_sequence.len());
        for bin in bin_sequence {
            if bin >= bins {
                return Err(PlannerError::ModelContract(format!(
                    "bin sequence contains bin {bin}, but the space has {bins} bins"
                )));
            }
            bin_queue.push_back(bin);
        }
        Ok(Self {
            entries: (0..bins)
                .map(|bin| DiscretizedEntry {
                    bin,
                    action: None,
                    stats: EntryStats::new(),
                })
                .collect(),
            bin_queue,
            n_children: 0,
            visited_entries: 0,
            total_visits: 0,
        })
    }

    fn bin_of(&self, model: &M, action: &M::Action) -> Result<usize> {
        let bin = model.action_bin(action).ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "action {action:?} carries no bin in a discretized space"
            ))
        })?;
        if bin >= self.entries.len() {
            return Err(PlannerError::ModelContract(format!(
                "action {action:?} reports bin {bin}, but the space has {} bins",
                self.entries.len()
            )));
        }
        Ok(bin)
    }

    pub(super) fn key_of(&self, model: &M, action: &M::Action) -> Result<EntryKey> {
        Ok(EntryKey::Bin(self.bin_of(model, action)?))
    }

    /// Pop the next untried bin and sample its representative action.
    pub(super) fn next_action_to_try(&mut self, model: &M) -> Result<Option<M::Action>> {
        let Some(bin) = self.bin_queue.pop_front() else {
            return Ok(None);
        };
        let entry = &mut self.entries[bin];
        if entry.action.is_none() {
            entry.action = Some(model.sample_action(bin)?);
        }
        Ok(entry.action.clone())
    }

    pub(super) fn entry(&self, model: &M, action: &M::Action) -> Result<Option<&EntryStats>> {
        let bin = self.bin_of(model, action)?;
        Ok(Some(&self.entries[bin].stats))
    }

    pub(super) fn set_child(
        &mut self,
        model: &M,
        action: &M::Action,
        child: ActionNodeId,
    ) -> Result<()> {
        let bin = self.bin_of(model, action)?;
        let entry = &mut self.entries[bin];
        if entry.action.is_none() {
            entry.action = Some(action.clone());
        }
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
        let bin = self.bin_of(model, action)?;
        let visited_delta = self.entries[bin].stats.update(delta_visits, delta_q);
        self.visited_entries = (self.visited_entries as i64 + visited_delta) as usize;
        self.total_visits += delta_visits;
        Ok(())
    }

    pub(super) fn set_legal(&mut self, model: &M, action: &M::Action, legal: bool) -> Result<()> {
        let bin = self.bin_of(model, action)?;
        self.entries[bin].stats.legal = legal;
        Ok(())
    }

    pub(super) fn entry_views(&self) -> Vec<ActionEntryView<M>> {
        self.entries
            .iter()
            .filter(|e| e.action.is_some())
            .map(|e| ActionEntryView {
                key: EntryKey::Bin(e.bin),
                action: e.action.clone().expect("filtered on materialized entries"),
                vector: None,
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

    /// Total number of bins in the space.
    pub fn bins(&self) -> usize {
        self.entries.len()
    }

    /// The untried bins, in exploration order.
    pub fn remaining_bins(&self) -> Vec<usize> {
        self.bin_queue.iter().copied().collect()
    }

    /// Rebuild one entry from a tree dump.
    pub(crate) fn restore_entry(
        &mut self,
        bin: usize,
        action: M::Action,
        legal: bool,
        visit_count: i64,
        total_q: f64,
        child: Option<ActionNodeId>,
    ) -> Result<()> {
        let Some(entry) = self.entries.get_mut(bin) else {
            return Err(PlannerError::ModelContract(format!(
                "restored entry references bin {bin}, but the space has {} bins",
                self.entries.len()
            )));
        };
        entry.action = Some(action);
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
    use abtree_core::{ActionSpace, PlannerRng, Step};

    struct ThreeArm;

    impl Model for ThreeArm {
        type State = u8;
        type Action = usize;
        type Observation = u8;
        type Change = ();

        fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
            0
        }

        fn step(&self, _rng: &mut PlannerRng, _state: &u8, action: &usize) -> Step<Self> {
            Step {
                next_state: 1,
                observation: 0,
                reward: *action as f64,
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
            ActionSpace::Discretized { bins: 3 }
        }

        fn action_bin(&self, action: &usize) -> Option<usize> {
            Some(*action)
        }

        fn sample_action(&self, bin: usize) -> Result<usize> {
            Ok(bin)
        }

        fn bin_sequence(&self, _particles: &[&u8]) -> Vec<usize> {
            vec![2, 0, 1]
        }
    }

    fn fresh_node_id() -> ActionNodeId {
        let mut arena: Arena<()> = Arena::new();
        ActionNodeId(arena.insert(()))
    }

    #[test]
    fn test_bin_queue_order() {
        let model = ThreeArm;
        let mut map: DiscretizedActionMap<ThreeArm> =
            DiscretizedActionMap::new(3, model.bin_sequence(&[])).unwrap();

        assert_eq!(map.next_action_to_try(&model).unwrap(), Some(2));
        assert_eq!(map.next_action_to_try(&model).unwrap(), Some(0));
        assert_eq!(map.next_action_to_try(&model).unwrap(), Some(1));
        assert_eq!(map.next_action_to_try(&model).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_bin_sequence_rejected() {
        let result: Result<DiscretizedActionMap<ThreeArm>> =
            DiscretizedActionMap::new(3, vec![0, 7]);
        assert!(matches!(result, Err(PlannerError::ModelContract(_))));
    }

    #[test]
    fn test_child_creation_marks_legal() {
        let model = ThreeArm;
        let mut map: DiscretizedActionMap<ThreeArm> =
            DiscretizedActionMap::new(3, vec![0, 1, 2]).unwrap();

        map.set_child(&model, &1, fresh_node_id()).unwrap();
        assert_eq!(map.n_children(), 1);

        let stats = map.entry(&model, &1).unwrap().unwrap();
        assert!(stats.is_legal());
        assert!(stats.child().is_some());
    }

    #[test]
    fn test_update_tracks_aggregates() {
        let model = ThreeArm;
        let mut map: DiscretizedActionMap<ThreeArm> =
            DiscretizedActionMap::new(3, vec![0, 1, 2]).unwrap();
        map.set_child(&model, &0, fresh_node_id()).unwrap();

        map.update_entry(&model, &0, 1, 2.0).unwrap();
        map.update_entry(&model, &0, 1, 4.0).unwrap();

        assert_eq!(map.total_visit_count(), 2);
        assert_eq!(map.number_of_visited_entries(), 1);
        let stats = map.entry(&model, &0).unwrap().unwrap();
        assert_eq!(stats.visit_count(), 2);
        assert!((stats.mean_q() - 3.0).abs() < 1e-12);

        // Reversal back to zero visits restores the unvisited sentinel.
        map.update_entry(&model, &0, -2, -6.0).unwrap();
        assert_eq!(map.number_of_visited_entries(), 0);
        let stats = map.entry(&model, &0).unwrap().unwrap();
        assert_eq!(stats.mean_q(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_unvisited_entries_hidden_from_views_until_materialized() {
        let model = ThreeArm;
        let mut map: DiscretizedActionMap<ThreeArm> =
            DiscretizedActionMap::new(3, vec![2, 0, 1]).unwrap();
        assert!(map.entry_views().is_empty());

        map.next_action_to_try(&model).unwrap();
        let views = map.entry_views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].key, EntryKey::Bin(2));
        assert!(!views[0].legal);
    }
}
