//! Simulation history records.
//!
//! Every simulation appends one `HistorySequence`: a chain of
//! ⟨state, action, observation, reward, belief⟩ entries. Sequences
//! persist between solver steps so that tree statistics are amortized,
//! and they carry enough information (rewards plus the leaf value used
//! at backup) to reverse their Q contributions exactly during change
//! propagation.

use crate::node::BeliefId;
use crate::state_pool::StateId;
use abtree_core::Model;

/// Stable handle to a history sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqId(pub(crate) u32);

/// One step of a simulation.
///
/// The last entry of a sequence has no action, observation, or reward;
/// it records only where the simulation ended.
#[derive(Clone, Debug)]
pub struct HistoryEntry<M: Model> {
    pub state: StateId,
    pub action: Option<M::Action>,
    pub observation: Option<M::Observation>,
    pub reward: f64,
    pub belief: BeliefId,
}

impl<M: Model> HistoryEntry<M> {
    pub(crate) fn leaf(state: StateId, belief: BeliefId) -> Self {
        Self {
            state,
            action: None,
            observation: None,
            reward: 0.0,
            belief,
        }
    }
}

/// A chain of history entries produced by one simulation.
#[derive(Clone, Debug)]
pub struct HistorySequence<M: Model> {
    pub id: SeqId,
    pub entries: Vec<HistoryEntry<M>>,
    /// Continuation value used at the last backup: the heuristic
    /// estimate at the leaf, the cached value of the belief the descent
    /// stopped in, or 0 on termination.
    pub leaf_value: f64,
    /// Whether the sequence ended in a terminal state.
    pub terminal: bool,
}

impl<M: Model> HistorySequence<M> {
    /// Discounted return from entry `index` onward, under the rewards
    /// and leaf value currently recorded.
    pub fn return_from(&self, index: usize, discount: f64) -> f64 {
        let last = self.entries.len().saturating_sub(1);
        let mut value = if self.terminal { 0.0 } else { self.leaf_value };
        for d in (index..last).rev() {
            value = self.entries[d].reward + discount * value;
        }
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Slotted store of all live sequences.
#[derive(Debug)]
pub struct Histories<M: Model> {
    slots: Vec<Option<HistorySequence<M>>>,
    free: Vec<u32>,
    live: usize,
}

impl<M: Model> Histories<M> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Create an empty sequence and return its id.
    pub fn create(&mut self) -> SeqId {
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                let id = SeqId(slot);
                self.slots[slot as usize] = Some(HistorySequence {
                    id,
                    entries: Vec::new(),
                    leaf_value: 0.0,
                    terminal: false,
                });
                id
            }
            None => {
                let id = SeqId(self.slots.len() as u32);
                self.slots.push(Some(HistorySequence {
                    id,
                    entries: Vec::new(),
                    leaf_value: 0.0,
                    terminal: false,
                }));
                id
            }
        }
    }

    pub fn get(&self, id: SeqId) -> &HistorySequence<M> {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("BUG: sequence id outlived its slot")
    }

    pub fn get_mut(&mut self, id: SeqId) -> &mut HistorySequence<M> {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("BUG: sequence id outlived its slot")
    }

    pub fn remove(&mut self, id: SeqId) -> HistorySequence<M> {
        let seq = self.slots[id.0 as usize]
            .take()
            .expect("BUG: sequence id outlived its slot");
        self.free.push(id.0);
        self.live -= 1;
        seq
    }

    /// Ids of all live sequences, in id order.
    pub fn ids(&self) -> Vec<SeqId> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<M: Model> Default for Histories<M> {
    fn default() -> Self {
        Self::new()
    }
}
