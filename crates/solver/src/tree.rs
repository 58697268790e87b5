//! The belief tree: arenas of belief and action nodes plus the
//! bookkeeping that keeps their statistics consistent.

use crate::arena::Arena;
use crate::histories::{Histories, SeqId};
use crate::mappings::{ActionMapping, ObservationMapping};
use crate::node::{ActionNode, ActionNodeId, BeliefId, BeliefNode, ParticleRef};
use abtree_core::{Model, PlannerRng, Result};

/// Arena-backed belief tree rooted at a single belief node.
#[derive(Debug)]
pub struct BeliefTree<M: Model> {
    beliefs: Arena<BeliefNode<M>>,
    actions: Arena<ActionNode<M>>,
    root: BeliefId,
    next_id: u64,
    /// Similarity threshold handed to approximate observation mappings.
    observation_threshold: f64,
}

impl<M: Model> BeliefTree<M> {
    /// Create a tree whose root carries the given action mapping.
    pub fn new(root_map: ActionMapping<M>, observation_threshold: f64) -> Self {
        let mut beliefs = Arena::new();
        let root = BeliefId(beliefs.insert(BeliefNode::new(0, 0, None, 0.0, root_map)));
        Self {
            beliefs,
            actions: Arena::new(),
            root,
            next_id: 1,
            observation_threshold,
        }
    }

    /// Assemble a tree from arenas rebuilt by the dump parser.
    pub(crate) fn from_parts(
        beliefs: Arena<BeliefNode<M>>,
        actions: Arena<ActionNode<M>>,
        root: BeliefId,
        next_id: u64,
        observation_threshold: f64,
    ) -> Self {
        Self {
            beliefs,
            actions,
            root,
            next_id,
            observation_threshold,
        }
    }

    pub fn root(&self) -> BeliefId {
        self.root
    }

    pub fn belief(&self, id: BeliefId) -> &BeliefNode<M> {
        self.beliefs.get(id.0).expect("BUG: stale belief id")
    }

    pub fn belief_mut(&mut self, id: BeliefId) -> &mut BeliefNode<M> {
        self.beliefs.get_mut(id.0).expect("BUG: stale belief id")
    }

    pub fn action_node(&self, id: ActionNodeId) -> &ActionNode<M> {
        self.actions.get(id.0).expect("BUG: stale action node id")
    }

    pub fn action_node_mut(&mut self, id: ActionNodeId) -> &mut ActionNode<M> {
        self.actions.get_mut(id.0).expect("BUG: stale action node id")
    }

    /// Whether `id` still resolves to a live node.
    pub fn contains(&self, id: BeliefId) -> bool {
        self.beliefs.get(id.0).is_some()
    }

    pub fn n_beliefs(&self) -> usize {
        self.beliefs.len()
    }

    pub fn n_action_nodes(&self) -> usize {
        self.actions.len()
    }

    /// All live belief ids, in arena order.
    pub fn belief_ids(&self) -> Vec<BeliefId> {
        self.beliefs.iter().map(|(id, _)| BeliefId(id)).collect()
    }

    /// All live action node ids, in arena order.
    pub fn action_node_ids(&self) -> Vec<ActionNodeId> {
        self.actions.iter().map(|(id, _)| ActionNodeId(id)).collect()
    }

    /// The action node under `belief` for `action`, created on first
    /// selection.
    pub fn ensure_action_node(
        &mut self,
        model: &M,
        belief: BeliefId,
        action: &M::Action,
    ) -> Result<ActionNodeId> {
        if let Some(existing) = self.belief(belief).action_map.child_of(model, action)? {
            return Ok(existing);
        }
        let node = ActionNode::new(
            belief,
            ObservationMapping::new(model, self.observation_threshold),
        );
        let id = ActionNodeId(self.actions.insert(node));
        self.belief_mut(belief)
            .action_map
            .set_child(model, action, id)?;
        Ok(id)
    }

    /// Route `observation` under `action_node`, creating the child
    /// belief if absent. Returns the child and whether it is new.
    ///
    /// A new child's action mapping derives its exploration order from
    /// `arrival_state`, the particle whose transition reached it; its
    /// value is seeded later by the caller.
    pub fn create_or_get_child(
        &mut self,
        model: &M,
        rng: &mut PlannerRng,
        action_node: ActionNodeId,
        observation: &M::Observation,
        arrival_state: &M::State,
    ) -> Result<(BeliefId, bool)> {
        if let Some(existing) = self
            .action_node(action_node)
            .obs_map
            .get_belief(model, observation)?
        {
            return Ok((existing, false));
        }

        let depth = self.belief(self.action_node(action_node).parent).depth + 1;
        let action_map = ActionMapping::new(model, rng, &[arrival_state])?;
        let id = self.next_id;
        self.next_id += 1;
        let child = BeliefId(self.beliefs.insert(BeliefNode::new(
            id,
            depth,
            Some(action_node),
            0.0,
            action_map,
        )));
        let routed = self
            .action_node_mut(action_node)
            .obs_map
            .insert_child(model, observation, child)?;
        debug_assert_eq!(routed, child);
        Ok((child, true))
    }

    /// Record that `seq`'s entry `entry` occupies `belief`.
    pub fn register_particle(&mut self, belief: BeliefId, seq: SeqId, entry: usize) {
        self.belief_mut(belief).particles.push(ParticleRef { seq, entry });
    }

    /// Remove the registration of `seq`'s entry `entry` from `belief`.
    pub fn deregister_particle(&mut self, belief: BeliefId, seq: SeqId, entry: usize) {
        let node = self.belief_mut(belief);
        let target = ParticleRef { seq, entry };
        let slot = node
            .particles
            .iter()
            .position(|p| *p == target)
            .expect("BUG: deregistering a particle that was never registered");
        node.particles.swap_remove(slot);
    }

    /// Renumber a particle registration after its entry index shifted.
    pub fn renumber_particle(&mut self, belief: BeliefId, seq: SeqId, old: usize, new: usize) {
        let node = self.belief_mut(belief);
        let target = ParticleRef { seq, entry: old };
        let slot = node
            .particles
            .iter()
            .position(|p| *p == target)
            .expect("BUG: renumbering a particle that was never registered");
        node.particles[slot].entry = new;
    }

    /// Incrementally maintain `action_node`'s statistics after its
    /// child belief `child` changed by `delta_n` sequences.
    ///
    /// The child is named directly rather than routed by observation:
    /// approximate routing can drift as clusters appear, but history
    /// entries remember the exact child they went through.
    ///
    /// The child's value is recalculated here, bracketed by its cached
    /// old value, so that
    /// `total_q = Σ_b sequences_through(b) · γ · Q(b)` stays exact.
    pub fn update_sequence_count(
        &mut self,
        action_node: ActionNodeId,
        child_id: BeliefId,
        discount: f64,
        delta_n: i64,
    ) {
        let child = self.belief_mut(child_id);
        let new_count = child.sequences_through();
        let old_count = new_count - delta_n;
        let old_q = child.value;
        child.recalculate_value();
        let new_q = child.value;

        let node = self.action_node_mut(action_node);
        if old_count != 0 {
            node.total_q -= old_count as f64 * discount * old_q;
        }
        if new_count != 0 {
            node.total_q += new_count as f64 * discount * new_q;
        }
        node.n_particles += delta_n;
        node.recalculate();
    }

    /// Refresh the root's cached value. The root has no parent edge, so
    /// this is the one value recalculation done outside
    /// [`update_sequence_count`](Self::update_sequence_count).
    pub fn recalculate_root_value(&mut self) {
        let root = self.root;
        self.belief_mut(root).recalculate_value();
    }

    /// Delete `belief` and every descendant. Stale ids simply stop
    /// resolving; history cleanup is the caller's responsibility.
    pub fn release_subtree(&mut self, belief: BeliefId) -> usize {
        self.release_subtree_except(belief, None)
    }

    /// Delete the subtree under `belief` without descending into
    /// `keep`, which is left attached to nothing.
    pub fn release_subtree_except(&mut self, belief: BeliefId, keep: Option<BeliefId>) -> usize {
        let mut removed = 0;
        let mut pending = vec![belief];
        while let Some(current) = pending.pop() {
            if Some(current) == keep {
                continue;
            }
            let Some(node) = self.beliefs.remove(current.0) else {
                continue;
            };
            removed += 1;
            for action_id in node.action_map.children() {
                if let Some(action_node) = self.actions.remove(action_id.0) {
                    pending.extend(action_node.obs_map.children());
                }
            }
        }
        removed
    }

    /// Make `new_root` the root: detach it from its parent, discard
    /// everything else, and rebase depths so the new root is at 0.
    pub fn re_root(&mut self, new_root: BeliefId) -> usize {
        let old_root = self.root;
        self.belief_mut(new_root).parent = None;
        let removed = self.release_subtree_except(old_root, Some(new_root));
        self.root = new_root;

        let shift = self.belief(new_root).depth;
        if shift > 0 {
            let mut pending = vec![new_root];
            while let Some(current) = pending.pop() {
                let node = self.belief_mut(current);
                node.depth -= shift;
                for action_id in self.belief(current).action_map.children() {
                    pending.extend(self.action_node(action_id).obs_map.children());
                }
            }
        }
        removed
    }

    /// Discard the entire current tree and install `new_root`, a
    /// detached belief created with
    /// [`new_detached_belief`](Self::new_detached_belief), as the root.
    pub fn replace_root(&mut self, new_root: BeliefId) -> usize {
        let old_root = self.root;
        let removed = self.release_subtree_except(old_root, Some(new_root));
        self.root = new_root;
        let node = self.belief_mut(new_root);
        node.depth = 0;
        node.parent = None;
        removed
    }

    /// Allocate a fresh, detached belief node (used when a step leads
    /// to an observation the tree has never routed).
    pub fn new_detached_belief(
        &mut self,
        model: &M,
        rng: &mut PlannerRng,
        particles: &[&M::State],
    ) -> Result<BeliefId> {
        let action_map = ActionMapping::new(model, rng, particles)?;
        let id = self.next_id;
        self.next_id += 1;
        Ok(BeliefId(self.beliefs.insert(BeliefNode::new(
            id, 0, None, 0.0, action_map,
        ))))
    }

    /// Verify the structural invariants of every live node under the
    /// effective backup discount, returning a description of the first
    /// violation found. Intended for tests.
    pub fn check_invariants(
        &self,
        histories: &Histories<M>,
        discount: f64,
    ) -> std::result::Result<(), String> {
        for (raw, belief) in self.beliefs.iter() {
            let id = BeliefId(raw);
            // Particle registrations must point at live entries in this
            // belief.
            for p in &belief.particles {
                let seq = histories.get(p.seq);
                let entry = seq
                    .entries
                    .get(p.entry)
                    .ok_or_else(|| format!("belief {} holds a dangling particle", belief.id))?;
                if entry.belief != id {
                    return Err(format!(
                        "belief {} holds a particle registered elsewhere",
                        belief.id
                    ));
                }
            }

            let views = belief.action_map.entry_views();
            let entry_sum: i64 = views.iter().map(|v| v.visit_count).sum();
            if entry_sum != belief.action_map.total_visit_count() {
                return Err(format!(
                    "belief {}: action map total {} != entry sum {}",
                    belief.id,
                    belief.action_map.total_visit_count(),
                    entry_sum
                ));
            }
            let visited = views.iter().filter(|v| v.visit_count > 0).count();
            if visited != belief.action_map.number_of_visited_entries() {
                return Err(format!(
                    "belief {}: visited-entry counter {} != {}",
                    belief.id,
                    belief.action_map.number_of_visited_entries(),
                    visited
                ));
            }
        }

        for (_, node) in self.actions.iter() {
            let entries = node.obs_map.entries();
            let visit_sum: i64 = entries.iter().map(|e| e.visits).sum();
            if visit_sum != node.obs_map.total_visit_count() {
                return Err(format!(
                    "action node under belief {}: obs map total {} != entry sum {}",
                    self.belief(node.parent).id,
                    node.obs_map.total_visit_count(),
                    visit_sum
                ));
            }

            let through: i64 = entries
                .iter()
                .map(|e| self.belief(e.child).sequences_through())
                .sum();
            if through != node.n_particles {
                return Err(format!(
                    "action node under belief {}: n_particles {} != sequences through children {}",
                    self.belief(node.parent).id,
                    node.n_particles,
                    through
                ));
            }

            if node.n_particles > 0 {
                let mean = node.total_q / node.n_particles as f64;
                if (mean - node.mean_q).abs() > 1e-9 {
                    return Err(format!(
                        "action node under belief {}: mean_q {} != total_q/n {}",
                        self.belief(node.parent).id,
                        node.mean_q,
                        mean
                    ));
                }
            } else if node.mean_q != f64::NEG_INFINITY {
                return Err(format!(
                    "action node under belief {}: empty node lacks the -inf sentinel",
                    self.belief(node.parent).id
                ));
            }

            let weighted: f64 = entries
                .iter()
                .map(|e| {
                    let child = self.belief(e.child);
                    child.sequences_through() as f64 * discount * child.value()
                })
                .sum();
            if (weighted - node.total_q).abs() > 1e-6 * (1.0 + node.total_q.abs()) {
                return Err(format!(
                    "action node under belief {}: total_q {} != weighted child sum {}",
                    self.belief(node.parent).id,
                    node.total_q,
                    weighted
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtree_core::{ActionSpace, PlannerRng, Result as CoreResult, Step};
    use rand::SeedableRng;

    struct TwoBin;

    impl Model for TwoBin {
        type State = u8;
        type Action = usize;
        type Observation = u8;
        type Change = ();

        fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
            0
        }

        fn step(&self, _rng: &mut PlannerRng, state: &u8, _action: &usize) -> Step<Self> {
            Step {
                next_state: state + 1,
                observation: state + 1,
                reward: 1.0,
                terminal: false,
            }
        }

        fn is_terminal(&self, _state: &u8) -> bool {
            false
        }

        fn discount_factor(&self) -> f64 {
            0.5
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discretized { bins: 2 }
        }

        fn action_bin(&self, action: &usize) -> Option<usize> {
            Some(*action)
        }

        fn sample_action(&self, bin: usize) -> CoreResult<usize> {
            Ok(bin)
        }
    }

    fn fresh_tree() -> (BeliefTree<TwoBin>, PlannerRng) {
        let mut rng = PlannerRng::seed_from_u64(9);
        let map = ActionMapping::new(&TwoBin, &mut rng, &[]).unwrap();
        (BeliefTree::new(map, 0.1), rng)
    }

    #[test]
    fn test_child_creation_assigns_monotonic_ids() {
        let (mut tree, mut rng) = fresh_tree();
        let root = tree.root();
        assert_eq!(tree.belief(root).id(), 0);

        let an = tree.ensure_action_node(&TwoBin, root, &0).unwrap();
        let (b1, new1) = tree
            .create_or_get_child(&TwoBin, &mut rng, an, &1, &1)
            .unwrap();
        let (b1_again, new2) = tree
            .create_or_get_child(&TwoBin, &mut rng, an, &1, &1)
            .unwrap();

        assert!(new1);
        assert!(!new2);
        assert_eq!(b1, b1_again);
        assert_eq!(tree.belief(b1).id(), 1);
        assert_eq!(tree.belief(b1).depth(), 1);
    }

    #[test]
    fn test_ensure_action_node_is_idempotent() {
        let (mut tree, _rng) = fresh_tree();
        let root = tree.root();
        let a = tree.ensure_action_node(&TwoBin, root, &1).unwrap();
        let b = tree.ensure_action_node(&TwoBin, root, &1).unwrap();
        assert_eq!(a, b);
        assert_eq!(tree.n_action_nodes(), 1);
    }

    #[test]
    fn test_release_subtree_frees_descendants() {
        let (mut tree, mut rng) = fresh_tree();
        let root = tree.root();
        let an = tree.ensure_action_node(&TwoBin, root, &0).unwrap();
        let (b1, _) = tree
            .create_or_get_child(&TwoBin, &mut rng, an, &1, &1)
            .unwrap();
        let an2 = tree.ensure_action_node(&TwoBin, b1, &0).unwrap();
        let (b2, _) = tree
            .create_or_get_child(&TwoBin, &mut rng, an2, &2, &2)
            .unwrap();

        assert_eq!(tree.n_beliefs(), 3);
        let removed = tree.release_subtree(b1);
        assert_eq!(removed, 2);
        assert!(!tree.contains(b1));
        assert!(!tree.contains(b2));
        assert!(tree.contains(root));
        assert_eq!(tree.n_action_nodes(), 1);
    }

    #[test]
    fn test_re_root_rebases_depths() {
        let (mut tree, mut rng) = fresh_tree();
        let root = tree.root();
        let an = tree.ensure_action_node(&TwoBin, root, &0).unwrap();
        let (b1, _) = tree
            .create_or_get_child(&TwoBin, &mut rng, an, &1, &1)
            .unwrap();
        let an2 = tree.ensure_action_node(&TwoBin, b1, &1).unwrap();
        let (b2, _) = tree
            .create_or_get_child(&TwoBin, &mut rng, an2, &2, &2)
            .unwrap();

        tree.re_root(b1);
        assert_eq!(tree.root(), b1);
        assert!(!tree.contains(root));
        assert_eq!(tree.belief(b1).depth(), 0);
        assert_eq!(tree.belief(b2).depth(), 1);
    }

    #[test]
    fn test_update_sequence_count_brackets_child_value() {
        let (mut tree, mut rng) = fresh_tree();
        let root = tree.root();
        let an = tree.ensure_action_node(&TwoBin, root, &0).unwrap();
        let (b1, _) = tree
            .create_or_get_child(&TwoBin, &mut rng, an, &1, &1)
            .unwrap();

        // Give the child one passing-through particle and a visited
        // entry so it has a value of 2.0.
        let mut histories: Histories<TwoBin> = Histories::new();
        let seq = histories.create();
        tree.register_particle(b1, seq, 1);
        tree.ensure_action_node(&TwoBin, b1, &0).unwrap();
        tree.belief_mut(b1)
            .action_map
            .update_entry(&TwoBin, &0, 1, 2.0)
            .unwrap();

        tree.update_sequence_count(an, b1, 0.5, 1);
        let node = tree.action_node(an);
        assert_eq!(node.n_particles(), 1);
        // total_q = through(1) · γ(0.5) · Q(2.0)
        assert!((node.total_q() - 1.0).abs() < 1e-12);
        assert!((node.mean_q() - 1.0).abs() < 1e-12);
    }
}
