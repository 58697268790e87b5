//! One simulation: traverse, expand, evaluate, back up.

use crate::config::SolverConfig;
use crate::heuristic::Heuristic;
use crate::histories::{Histories, HistoryEntry, SeqId};
use crate::state_pool::StatePool;
use crate::tree::BeliefTree;
use abtree_core::{Model, PlannerError, PlannerRng, Result};
use rand::Rng;

/// Mutable view of everything a simulation touches.
pub(crate) struct SearchContext<'a, M: Model, H: Heuristic<M>> {
    pub model: &'a M,
    pub heuristic: &'a H,
    pub config: &'a SolverConfig,
    pub discount: f64,
    pub rng: &'a mut PlannerRng,
    pub tree: &'a mut BeliefTree<M>,
    pub pool: &'a mut StatePool<M>,
    pub histories: &'a mut Histories<M>,
}

/// What one completed simulation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SimulationReport {
    /// Whether the tree gained a new belief node.
    pub extended: bool,
}

/// Run one simulation from the current root.
///
/// Fails with [`PlannerError::EmptyBelief`] when the root has no
/// particles; the caller treats that as a logged skip, not a fault.
pub(crate) fn simulate_once<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
) -> Result<SimulationReport> {
    let root = ctx.tree.root();
    let n = ctx.tree.belief(root).particles.len();
    if n == 0 {
        return Err(PlannerError::EmptyBelief(ctx.tree.belief(root).id()));
    }

    // Seed a fresh sequence with a copy of a uniformly drawn particle.
    let pick = ctx.rng.gen_range(0..n);
    let picked = ctx.tree.belief(root).particles[pick];
    let state_id = ctx.histories.get(picked.seq).entries[picked.entry].state;

    let seq = ctx.histories.create();
    ctx.pool.acquire(state_id);
    ctx.histories
        .get_mut(seq)
        .entries
        .push(HistoryEntry::leaf(state_id, root));
    ctx.tree.register_particle(root, seq, 0);
    ctx.tree.belief_mut(root).n_starting += 1;

    let extended = extend_sequence(ctx, seq, None)?;
    backup_new_edges(ctx, seq, 0)?;

    Ok(SimulationReport { extended })
}

/// Descend from the sequence's current last entry until the tree is
/// extended, a terminal state is reached, the horizon is hit, or no
/// legal action remains. Registers new entries as it goes and records
/// the leaf continuation value on the sequence.
///
/// With `replay` set, the given actions are taken in order instead of
/// consulting the bandit; descent stops when they run out. Change
/// propagation uses this to redo a stale suffix under the updated
/// model.
///
/// Returns whether a belief node was created.
pub(crate) fn extend_sequence<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
    replay: Option<Vec<M::Action>>,
) -> Result<bool> {
    let (mut belief, state_id) = {
        let sequence = ctx.histories.get(seq);
        let last = sequence
            .entries
            .last()
            .expect("BUG: extending an empty sequence");
        (last.belief, last.state)
    };
    let mut state = ctx.pool.state(state_id).clone();
    let mut extended = false;
    let mut terminal = ctx.model.is_terminal(&state);
    let mut replay = replay.map(Vec::into_iter);

    while !terminal {
        if ctx.tree.belief(belief).depth >= ctx.config.maximum_depth {
            break;
        }

        let action = match replay.as_mut() {
            Some(actions) => match actions.next() {
                Some(action) => action,
                None => break,
            },
            None => {
                let map = &mut ctx.tree.belief_mut(belief).action_map;
                match map.next_action_to_try(ctx.model, ctx.rng)? {
                    Some(action) => action,
                    None => match map.ucb_select(ctx.config.ucb_coefficient) {
                        Some(action) => action,
                        None => break,
                    },
                }
            }
        };

        let step = ctx.model.step(ctx.rng, &state, &action);
        if !step.reward.is_finite() {
            return Err(PlannerError::ModelContract(format!(
                "non-finite reward {} for action {action:?}",
                step.reward
            )));
        }
        if step.terminal && !ctx.model.is_terminal(&step.next_state) {
            return Err(PlannerError::ModelContract(format!(
                "step reported terminal but {:?} still generates transitions",
                step.next_state
            )));
        }

        let action_node = ctx.tree.ensure_action_node(ctx.model, belief, &action)?;
        let (child, was_new) = ctx.tree.create_or_get_child(
            ctx.model,
            ctx.rng,
            action_node,
            &step.observation,
            &step.next_state,
        )?;

        let edge = {
            let sequence = ctx.histories.get_mut(seq);
            let edge = sequence.entries.len() - 1;
            let entry = &mut sequence.entries[edge];
            entry.action = Some(action.clone());
            entry.observation = Some(step.observation.clone());
            entry.reward = step.reward;
            edge
        };

        let next_id = ctx.pool.add_or_get_canonical(step.next_state.clone());
        ctx.pool.acquire(next_id);
        ctx.histories
            .get_mut(seq)
            .entries
            .push(HistoryEntry::leaf(next_id, child));
        ctx.tree.register_particle(child, seq, edge + 1);
        ctx.tree
            .action_node_mut(action_node)
            .obs_map
            .update_visit_count_for_child(child, 1)?;

        state = step.next_state;
        belief = child;
        terminal = step.terminal || ctx.model.is_terminal(&state);
        if was_new {
            extended = true;
            break;
        }
    }

    let leaf_value = if terminal {
        0.0
    } else if extended {
        ctx.heuristic.value(ctx.model, &state, ctx.rng)?
    } else {
        ctx.tree.belief(belief).value()
    };
    if !leaf_value.is_finite() {
        return Err(PlannerError::NumericDegeneracy(format!(
            "leaf value {leaf_value} at belief {}",
            ctx.tree.belief(belief).id()
        )));
    }

    {
        let sequence = ctx.histories.get_mut(seq);
        sequence.leaf_value = leaf_value;
        sequence.terminal = terminal;
    }
    let node = ctx.tree.belief_mut(belief);
    node.n_ending += 1;
    if extended && !terminal {
        // Seed the fresh leaf's value. Its parent edge has never
        // accounted a sequence count, so no bracketing is disturbed.
        node.value = leaf_value;
    }

    Ok(extended)
}

/// Back up a freshly registered tail of `seq`: every edge from
/// `from_edge` to the end receives `(ΔN = +1, ΔQ = +G)`, and the
/// action-node statistics along the path are maintained incrementally.
pub(crate) fn backup_new_edges<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
    from_edge: usize,
) -> Result<()> {
    let (last, terminal, leaf_value, first_belief) = {
        let sequence = ctx.histories.get(seq);
        (
            sequence.entries.len() - 1,
            sequence.terminal,
            sequence.leaf_value,
            sequence.entries[0].belief,
        )
    };

    let mut value = if terminal { 0.0 } else { leaf_value };
    for edge in (from_edge..last).rev() {
        let (belief, action, child, reward) = {
            let entry = &ctx.histories.get(seq).entries[edge];
            let next = &ctx.histories.get(seq).entries[edge + 1];
            (
                entry.belief,
                entry.action.clone().expect("BUG: backup across an edge without an action"),
                next.belief,
                entry.reward,
            )
        };

        value = reward + ctx.discount * value;
        if !value.is_finite() {
            return Err(PlannerError::NumericDegeneracy(format!(
                "return diverged at belief {}",
                ctx.tree.belief(belief).id()
            )));
        }

        ctx.tree
            .belief_mut(belief)
            .action_map
            .update_entry(ctx.model, &action, 1, value)?;
        let action_node = ctx
            .tree
            .belief(belief)
            .action_map
            .child_of(ctx.model, &action)?
            .expect("BUG: backed-up edge has no action node");
        ctx.tree
            .update_sequence_count(action_node, child, ctx.discount, 1);
    }

    if first_belief == ctx.tree.root() {
        ctx.tree.recalculate_root_value();
    }
    Ok(())
}
