//! Structure-preserving tree repair after model changes.
//!
//! When the world mutates between steps, the tree is repaired in place
//! instead of discarded: affected states are flagged through the state
//! pool, every sequence is swept for stale entries (flagged states, and
//! states the model's `is_valid` no longer accepts), stale suffixes are
//! re-simulated under the updated model, and the Q contributions of
//! surviving prefixes are adjusted exactly. After repair the tree obeys
//! the same invariants as one grown afresh.

use crate::heuristic::Heuristic;
use crate::histories::SeqId;
use crate::search::{backup_new_edges, extend_sequence, SearchContext};
use crate::state_pool::StateId;
use abtree_core::{ChangeFlags, Model, Result};

/// Summary of one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Sequences whose stale suffix was re-simulated.
    pub sequences_repaired: usize,
    /// Sequences deleted because their first state became invalid.
    pub sequences_deleted: usize,
    /// Changes skipped because the model rejected them.
    pub changes_skipped: usize,
    /// States that received change flags.
    pub states_flagged: usize,
}

enum Verdict {
    Clean,
    Delete,
    /// Re-simulate from this edge index.
    Repair(usize),
}

/// A state is dead when it carries the `DELETED` flag or the model no
/// longer accepts it. The validity check catches states a change
/// invalidated without covering them in its reported region.
fn dead<M: Model, H: Heuristic<M>>(ctx: &SearchContext<'_, M, H>, state: StateId) -> bool {
    ctx.pool.info(state).flags().contains(ChangeFlags::DELETED)
        || !ctx.model.is_valid(ctx.pool.state(state))
}

fn assess<M: Model, H: Heuristic<M>>(ctx: &SearchContext<'_, M, H>, seq: SeqId) -> Verdict {
    let sequence = ctx.histories.get(seq);
    if dead(ctx, sequence.entries[0].state) {
        return Verdict::Delete;
    }

    let stale_after = ChangeFlags::DELETED
        | ChangeFlags::TRANSITION_BEFORE
        | ChangeFlags::OBSERVATION_BEFORE
        | ChangeFlags::REWARD_BEFORE;
    for edge in 0..sequence.entries.len().saturating_sub(1) {
        let own = sequence.entries[edge].state;
        let next = sequence.entries[edge + 1].state;
        let next_stale =
            ctx.pool.info(next).flags().intersects(stale_after) || dead(ctx, next);
        if next_stale || dead(ctx, own) {
            return Verdict::Repair(edge);
        }
    }
    Verdict::Clean
}

/// Reverse and deregister every edge of `seq` from `from_edge` to the
/// end, leaving entries `0..=from_edge` in place with the edge fields
/// of entry `from_edge` cleared. The sequence's ending mark is removed;
/// the caller either re-extends or deletes what remains.
fn remove_suffix<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
    from_edge: usize,
) -> Result<()> {
    let last = ctx.histories.get(seq).entries.len() - 1;

    // Per-edge returns under the rewards still recorded, captured
    // before any mutation.
    let returns: Vec<f64> = (from_edge..last)
        .map(|edge| ctx.histories.get(seq).return_from(edge, ctx.discount))
        .collect();

    let end_belief = ctx.histories.get(seq).entries[last].belief;
    ctx.tree.belief_mut(end_belief).n_ending -= 1;

    for edge in (from_edge..last).rev() {
        let (belief, action, child_belief, child_state) = {
            let entry = &ctx.histories.get(seq).entries[edge];
            let next = &ctx.histories.get(seq).entries[edge + 1];
            (
                entry.belief,
                entry.action.clone().expect("BUG: suffix edge without an action"),
                next.belief,
                next.state,
            )
        };

        ctx.tree.belief_mut(belief).action_map.update_entry(
            ctx.model,
            &action,
            -1,
            -returns[edge - from_edge],
        )?;
        let action_node = ctx
            .tree
            .belief(belief)
            .action_map
            .child_of(ctx.model, &action)?
            .expect("BUG: reversed edge has no action node");
        ctx.tree
            .action_node_mut(action_node)
            .obs_map
            .update_visit_count_for_child(child_belief, -1)?;
        ctx.tree.deregister_particle(child_belief, seq, edge + 1);
        ctx.pool.release(child_state);
        ctx.tree
            .update_sequence_count(action_node, child_belief, ctx.discount, -1);
    }

    let sequence = ctx.histories.get_mut(seq);
    sequence.entries.truncate(from_edge + 1);
    let kept = &mut sequence.entries[from_edge];
    kept.action = None;
    kept.observation = None;
    kept.reward = 0.0;
    Ok(())
}

/// Apply `(ΔN = 0, ΔQ = γ^{k−d} · delta)` at every prefix edge `d < k`.
///
/// Runs even when `delta` is zero so that the repaired belief's value
/// change is bracketed by its parent's sequence-count update.
fn adjust_prefix<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
    from_edge: usize,
    delta: f64,
) -> Result<()> {
    let mut scaled = delta;
    for edge in (0..from_edge).rev() {
        scaled *= ctx.discount;
        let (belief, action, child) = {
            let entry = &ctx.histories.get(seq).entries[edge];
            let next = &ctx.histories.get(seq).entries[edge + 1];
            (
                entry.belief,
                entry.action.clone().expect("BUG: prefix edge without an action"),
                next.belief,
            )
        };
        ctx.tree
            .belief_mut(belief)
            .action_map
            .update_entry(ctx.model, &action, 0, scaled)?;
        let action_node = ctx
            .tree
            .belief(belief)
            .action_map
            .child_of(ctx.model, &action)?
            .expect("BUG: prefix edge has no action node");
        ctx.tree
            .update_sequence_count(action_node, child, ctx.discount, 0);
    }
    if ctx.histories.get(seq).entries[0].belief == ctx.tree.root() {
        ctx.tree.recalculate_root_value();
    }
    Ok(())
}

/// Re-simulate `seq` from `from_edge` with the same actions under the
/// updated model, then restore every statistic along the old and new
/// paths.
fn repair_sequence<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
    from_edge: usize,
) -> Result<()> {
    let old_return = ctx.histories.get(seq).return_from(from_edge, ctx.discount);
    let actions: Vec<M::Action> = {
        let sequence = ctx.histories.get(seq);
        sequence.entries[from_edge..sequence.entries.len() - 1]
            .iter()
            .map(|e| e.action.clone().expect("BUG: suffix edge without an action"))
            .collect()
    };

    remove_suffix(ctx, seq, from_edge)?;
    extend_sequence(ctx, seq, Some(actions))?;
    backup_new_edges(ctx, seq, from_edge)?;

    let new_return = ctx.histories.get(seq).return_from(from_edge, ctx.discount);
    adjust_prefix(ctx, seq, from_edge, new_return - old_return)
}

/// Delete `seq` entirely, reversing every contribution it made.
fn delete_sequence<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
    seq: SeqId,
) -> Result<()> {
    remove_suffix(ctx, seq, 0)?;

    let (belief, state) = {
        let entry = &ctx.histories.get(seq).entries[0];
        (entry.belief, entry.state)
    };
    ctx.tree.deregister_particle(belief, seq, 0);
    ctx.tree.belief_mut(belief).n_starting -= 1;
    ctx.pool.release(state);
    ctx.histories.remove(seq);

    if belief == ctx.tree.root() {
        ctx.tree.recalculate_root_value();
    }
    Ok(())
}

/// Sweep every sequence and repair or delete the stale ones.
pub(crate) fn repair_tree<M: Model, H: Heuristic<M>>(
    ctx: &mut SearchContext<'_, M, H>,
) -> Result<(usize, usize)> {
    let mut repaired = 0;
    let mut deleted = 0;
    for seq in ctx.histories.ids() {
        match assess(ctx, seq) {
            Verdict::Clean => {}
            Verdict::Delete => {
                delete_sequence(ctx, seq)?;
                deleted += 1;
            }
            Verdict::Repair(edge) => {
                repair_sequence(ctx, seq, edge)?;
                repaired += 1;
            }
        }
    }
    Ok((repaired, deleted))
}
