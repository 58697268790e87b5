//! Process-wide store of sampled states.
//!
//! Every particle in the belief tree is a reference into this pool;
//! states are deduplicated by equality so that repeated samples of the
//! same state share one `StateInfo` and one set of change flags.

use abtree_core::{ChangeFlags, Model, PlannerError, Result};
use std::collections::HashMap;

/// Stable handle to a pooled state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A canonical state plus its pool bookkeeping.
#[derive(Debug)]
pub struct StateInfo<M: Model> {
    pub(crate) state: M::State,
    pub(crate) id: StateId,
    pub(crate) flags: ChangeFlags,
    pub(crate) references: usize,
}

impl<M: Model> StateInfo<M> {
    pub fn state(&self) -> &M::State {
        &self.state
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn flags(&self) -> ChangeFlags {
        self.flags
    }
}

/// Deduplicating state store with change-flag tracking and spatial
/// queries over model-projected coordinates.
#[derive(Debug)]
pub struct StatePool<M: Model> {
    slots: Vec<Option<StateInfo<M>>>,
    free: Vec<u32>,
    index: HashMap<M::State, StateId>,
}

impl<M: Model> StatePool<M> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Return the canonical id for `state`, inserting it if absent.
    /// Two equal states always share one id.
    pub fn add_or_get_canonical(&mut self, state: M::State) -> StateId {
        if let Some(&id) = self.index.get(&state) {
            return id;
        }
        let id = match self.free.pop() {
            Some(slot) => StateId(slot),
            None => {
                self.slots.push(None);
                StateId(self.slots.len() as u32 - 1)
            }
        };
        self.index.insert(state.clone(), id);
        self.slots[id.0 as usize] = Some(StateInfo {
            state,
            id,
            flags: ChangeFlags::empty(),
            references: 0,
        });
        id
    }

    pub fn info(&self, id: StateId) -> &StateInfo<M> {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("BUG: state id outlived its pool entry")
    }

    pub fn state(&self, id: StateId) -> &M::State {
        &self.info(id).state
    }

    /// Record one more history-entry reference to `id`.
    pub fn acquire(&mut self, id: StateId) {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("BUG: state id outlived its pool entry")
            .references += 1;
    }

    /// Drop one history-entry reference to `id`. The state becomes
    /// eligible for eviction when the count reaches zero.
    pub fn release(&mut self, id: StateId) {
        let info = self.slots[id.0 as usize]
            .as_mut()
            .expect("BUG: state id outlived its pool entry");
        debug_assert!(info.references > 0);
        info.references -= 1;
    }

    /// Attach change flags to a state.
    pub fn flag(&mut self, id: StateId, flags: ChangeFlags) {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("BUG: state id outlived its pool entry")
            .flags |= flags;
    }

    /// Clear a state's change flags.
    pub fn clear_flags(&mut self, id: StateId) {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("BUG: state id outlived its pool entry")
            .flags = ChangeFlags::empty();
    }

    /// Clear every pending flag in the pool.
    pub fn clear_all_flags(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.flags = ChangeFlags::empty();
        }
    }

    /// Visit every state whose coordinates fall inside the axis-aligned
    /// box `[low, high]`, in id order.
    ///
    /// Fails with [`PlannerError::StateNotFound`] when the model
    /// declares no continuous state variables, and with a contract
    /// violation when the corner dimensions disagree with the model.
    pub fn spatial_query<F>(&self, model: &M, low: &[f64], high: &[f64], mut visitor: F) -> Result<()>
    where
        F: FnMut(&StateInfo<M>),
    {
        let dims = model.state_variable_count().ok_or_else(|| {
            PlannerError::StateNotFound(
                "spatial query on a model without continuous state variables".into(),
            )
        })?;
        if low.len() != dims || high.len() != dims {
            return Err(PlannerError::ModelContract(format!(
                "spatial query corners have {}/{} coordinates, model declares {dims}",
                low.len(),
                high.len()
            )));
        }

        for info in self.slots.iter().flatten() {
            let coords = model.state_coordinates(&info.state);
            if coords.len() != dims {
                return Err(PlannerError::ModelContract(format!(
                    "state {:?} projects to {} coordinates, model declares {dims}",
                    info.state,
                    coords.len()
                )));
            }
            let inside = coords
                .iter()
                .zip(low.iter().zip(high.iter()))
                .all(|(&x, (&lo, &hi))| x >= lo && x <= hi);
            if inside {
                visitor(info);
            }
        }
        Ok(())
    }

    /// Ids of all states inside the box, in id order.
    pub fn states_in_box(&self, model: &M, low: &[f64], high: &[f64]) -> Result<Vec<StateId>> {
        let mut ids = Vec::new();
        self.spatial_query(model, low, high, |info| ids.push(info.id))?;
        Ok(ids)
    }

    /// Ids of all pooled states, in id order.
    pub fn all_states(&self) -> Vec<StateId> {
        self.slots
            .iter()
            .flatten()
            .map(|info| info.id)
            .collect()
    }

    /// Ids of states carrying any pending change flag, in id order.
    pub fn flagged_states(&self) -> Vec<StateId> {
        self.slots
            .iter()
            .flatten()
            .filter(|info| !info.flags.is_empty())
            .map(|info| info.id)
            .collect()
    }

    /// Evict every state with no remaining references. Returns how many
    /// were removed.
    pub fn evict_unreferenced(&mut self) -> usize {
        let mut evicted = 0;
        for slot in 0..self.slots.len() {
            let dead = matches!(&self.slots[slot], Some(info) if info.references == 0);
            if dead {
                let info = self.slots[slot].take().expect("checked above");
                self.index.remove(&info.state);
                self.free.push(slot as u32);
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of pooled states.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` still resolves to a pooled state.
    pub fn contains(&self, id: StateId) -> bool {
        self.slots
            .get(id.0 as usize)
            .map_or(false, |slot| slot.is_some())
    }
}

impl<M: Model> Default for StatePool<M> {
    fn default() -> Self {
        Self::new()
    }
}
