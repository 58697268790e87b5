//! The solver facade: owns the model, the tree, the particle pool, and
//! the histories, and orchestrates search, stepping, and repair.

use crate::changes::ChangeReport;
use crate::config::{SearchBudget, SolverConfig};
use crate::heuristic::Heuristic;
use crate::histories::{Histories, HistoryEntry};
use crate::mappings::ActionMapping;
use crate::search::{simulate_once, SearchContext};
use crate::state_pool::StatePool;
use crate::tree::BeliefTree;
use crate::{changes, serial};
use abtree_core::{Model, ObservationSpace, PlannerError, PlannerRng, Result};
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{event, Level};

/// Statistics from one `improve_policy` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Simulations attempted (including skipped ones).
    pub simulations: u64,
    /// Simulations that extended the tree with a new belief.
    pub extensions: u64,
    /// Simulations skipped because the root belief was empty.
    pub skipped: u64,
}

/// Statistics from one `step` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Whether the child belief already existed in the tree.
    pub child_existed: bool,
    /// Sequences retained through the new root.
    pub sequences_retained: usize,
    /// Sequences discarded with the rest of the tree.
    pub sequences_dropped: usize,
    /// Fresh particles added by conditioned resampling.
    pub resampled: usize,
    /// Belief nodes released.
    pub beliefs_released: usize,
    /// States evicted from the pool.
    pub states_evicted: usize,
}

/// Online POMDP planner over a belief tree.
#[derive(Debug)]
pub struct Solver<M: Model, H: Heuristic<M>> {
    config: SolverConfig,
    model: M,
    heuristic: H,
    rng: PlannerRng,
    discount: f64,
    pool: StatePool<M>,
    histories: Histories<M>,
    tree: BeliefTree<M>,
    simulations_total: u64,
}

impl<M: Model, H: Heuristic<M>> Solver<M, H> {
    /// Build a solver and its root belief from
    /// `config.particle_count` initial-state samples.
    pub fn new(model: M, heuristic: H, config: SolverConfig) -> Result<Self> {
        let discount = config.discount_factor.unwrap_or(model.discount_factor());
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(PlannerError::ModelContract(format!(
                "discount factor {discount} outside (0, 1]"
            )));
        }

        let mut rng = PlannerRng::seed_from_u64(config.seed);
        let states: Vec<M::State> = (0..config.particle_count)
            .map(|_| model.sample_initial_state(&mut rng))
            .collect();
        let refs: Vec<&M::State> = states.iter().collect();
        let root_map = ActionMapping::new(&model, &mut rng, &refs)?;
        let mut tree = BeliefTree::new(root_map, config.observation_threshold);

        let mut pool = StatePool::new();
        let mut histories = Histories::new();
        let root = tree.root();
        for state in states {
            let state_id = pool.add_or_get_canonical(state);
            pool.acquire(state_id);
            let seq = histories.create();
            histories
                .get_mut(seq)
                .entries
                .push(HistoryEntry::leaf(state_id, root));
            tree.register_particle(root, seq, 0);
            let node = tree.belief_mut(root);
            node.n_starting += 1;
            node.n_ending += 1;
        }

        Ok(Self {
            config,
            model,
            heuristic,
            rng,
            discount,
            pool,
            histories,
            tree,
            simulations_total: 0,
        })
    }

    fn context(&mut self) -> SearchContext<'_, M, H> {
        SearchContext {
            model: &self.model,
            heuristic: &self.heuristic,
            config: &self.config,
            discount: self.discount,
            rng: &mut self.rng,
            tree: &mut self.tree,
            pool: &mut self.pool,
            histories: &mut self.histories,
        }
    }

    /// Run simulations from the current root until the configured
    /// budget is exhausted. Blocking; each simulation is atomic.
    pub fn improve_policy(&mut self) -> Result<SearchStats> {
        let started = Instant::now();
        let budget = self.config.search_budget;
        let mut stats = SearchStats::default();

        loop {
            match budget {
                SearchBudget::Simulations(n) if stats.simulations >= n => break,
                SearchBudget::Millis(ms)
                    if started.elapsed() >= Duration::from_millis(ms) =>
                {
                    break
                }
                _ => {}
            }

            let index = self.simulations_total;
            let outcome = {
                let mut ctx = self.context();
                simulate_once(&mut ctx)
            };
            self.simulations_total += 1;

            match outcome {
                Ok(report) => {
                    stats.simulations += 1;
                    if report.extended {
                        stats.extensions += 1;
                    }
                }
                Err(PlannerError::EmptyBelief(belief)) => {
                    stats.simulations += 1;
                    stats.skipped += 1;
                    event!(Level::WARN, belief, "empty root belief, skipping simulation");
                    // Nothing can repopulate the root mid-call.
                    break;
                }
                Err(PlannerError::ModelContract(reason)) => {
                    return Err(PlannerError::ModelContract(format!(
                        "{reason} [simulation {index}, seed {}]",
                        self.config.seed
                    )));
                }
                Err(other) => return Err(other),
            }
        }

        event!(
            Level::DEBUG,
            simulations = stats.simulations,
            extensions = stats.extensions,
            beliefs = self.tree.n_beliefs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "policy improved"
        );
        Ok(stats)
    }

    /// The root action with the highest mean Q among legal visited
    /// entries; ties go to the higher visit count, then the smaller
    /// bin or fingerprint. `None` before any simulation has run.
    pub fn recommend_action(&self) -> Option<M::Action> {
        self.tree
            .belief(self.tree.root())
            .action_map()
            .recommended()
    }

    /// Advance the root to the child belief under `(action,
    /// observation)`, resampling through the particle filter when the
    /// child is missing or under-populated, and release everything that
    /// is no longer reachable.
    pub fn step(&mut self, action: &M::Action, observation: &M::Observation) -> Result<StepReport> {
        let root = self.tree.root();
        let child = match self
            .tree
            .belief(root)
            .action_map()
            .child_of(&self.model, action)?
        {
            Some(action_node) => self
                .tree
                .action_node(action_node)
                .obs_map()
                .get_belief(&self.model, observation)?,
            None => None,
        };

        // Snapshot the prior's particles before anything is released;
        // conditioned resampling draws from them.
        let prior_states: Vec<M::State> = {
            let node = self.tree.belief(root);
            node.particles
                .iter()
                .map(|p| {
                    self.pool
                        .state(self.histories.get(p.seq).entries[p.entry].state)
                        .clone()
                })
                .collect()
        };

        let mut report = StepReport {
            child_existed: child.is_some(),
            ..StepReport::default()
        };

        // Partition the histories: sequences through the child survive
        // with their first entry cut off, the rest die with the
        // discarded subtrees.
        for seq_id in self.histories.ids() {
            let passes = child.is_some_and(|c| {
                let sequence = self.histories.get(seq_id);
                sequence.entries.len() >= 2 && sequence.entries[1].belief == c
            });
            if passes {
                let first_state = self.histories.get(seq_id).entries[0].state;
                self.pool.release(first_state);
                self.histories.get_mut(seq_id).entries.remove(0);
                let remaining: Vec<_> = self
                    .histories
                    .get(seq_id)
                    .entries
                    .iter()
                    .map(|e| e.belief)
                    .collect();
                for (new_index, belief) in remaining.into_iter().enumerate() {
                    self.tree
                        .renumber_particle(belief, seq_id, new_index + 1, new_index);
                }
                let c = child.expect("passes implies child");
                self.tree.belief_mut(c).n_starting += 1;
                report.sequences_retained += 1;
            } else {
                let states: Vec<_> = self
                    .histories
                    .get(seq_id)
                    .entries
                    .iter()
                    .map(|e| e.state)
                    .collect();
                for state in states {
                    self.pool.release(state);
                }
                self.histories.remove(seq_id);
                report.sequences_dropped += 1;
            }
        }

        match child {
            Some(c) => {
                report.beliefs_released = self.tree.re_root(c);
            }
            None => {
                let fresh = self.tree.new_detached_belief(&self.model, &mut self.rng, &[])?;
                report.beliefs_released = self.tree.replace_root(fresh);
            }
        }

        // Particle filter: repopulate an absent or thin root belief by
        // resampling from the prior conditioned on (action,
        // observation).
        let current = self.tree.belief(self.tree.root()).particles.len();
        if current < self.config.minimum_particle_count {
            report.resampled =
                self.resample_into_root(&prior_states, action, observation, current)?;
        }

        report.states_evicted = self.pool.evict_unreferenced();
        event!(
            Level::DEBUG,
            child_existed = report.child_existed,
            retained = report.sequences_retained,
            dropped = report.sequences_dropped,
            resampled = report.resampled,
            "stepped root"
        );
        Ok(report)
    }

    fn resample_into_root(
        &mut self,
        prior_states: &[M::State],
        action: &M::Action,
        observation: &M::Observation,
        current: usize,
    ) -> Result<usize> {
        if prior_states.is_empty() {
            event!(Level::WARN, "cannot resample: prior belief was empty");
            return Ok(0);
        }

        let target = self.config.particle_count.saturating_sub(current);
        let max_attempts = self.config.particle_count.saturating_mul(16).max(16);
        let root = self.tree.root();
        let mut added = 0;

        for _ in 0..max_attempts {
            if added >= target {
                break;
            }
            let pick = self.rng.gen_range(0..prior_states.len());
            let state = prior_states[pick].clone();
            if self.model.is_terminal(&state) || !self.model.is_valid(&state) {
                continue;
            }
            let step = self.model.step(&mut self.rng, &state, action);
            if !self.model.is_valid(&step.next_state) {
                continue;
            }
            let accepted = match self.model.observation_space() {
                ObservationSpace::Exact => step.observation == *observation,
                ObservationSpace::Approximate => self
                    .model
                    .observation_distance(&step.observation, observation)
                    .is_some_and(|d| d <= self.config.observation_threshold),
            };
            if !accepted {
                continue;
            }

            let state_id = self.pool.add_or_get_canonical(step.next_state);
            self.pool.acquire(state_id);
            let seq = self.histories.create();
            self.histories
                .get_mut(seq)
                .entries
                .push(HistoryEntry::leaf(state_id, root));
            self.tree.register_particle(root, seq, 0);
            let node = self.tree.belief_mut(root);
            node.n_starting += 1;
            node.n_ending += 1;
            added += 1;
        }

        if added < target {
            event!(
                Level::WARN,
                added,
                target,
                "resampling fell short of the requested particle count"
            );
        }
        Ok(added)
    }

    /// Apply a batch of model changes and repair the tree in place.
    pub fn apply_changes(&mut self, model_changes: &[M::Change]) -> Result<ChangeReport> {
        let mut report = ChangeReport::default();

        for change in model_changes {
            match self.model.apply_change(change) {
                Ok(effect) => {
                    // A change with no flags leaves detection to the
                    // validity sweep.
                    if effect.flags.is_empty() {
                        continue;
                    }
                    let ids = match &effect.region {
                        Some((low, high)) => self.pool.states_in_box(&self.model, low, high)?,
                        None => self.pool.all_states(),
                    };
                    report.states_flagged += ids.len();
                    for id in ids {
                        self.pool.flag(id, effect.flags);
                    }
                }
                Err(PlannerError::ChangeUnapplicable(reason)) => {
                    event!(Level::WARN, %reason, "skipping unapplicable change");
                    report.changes_skipped += 1;
                }
                Err(other) => return Err(other),
            }
        }

        let (repaired, deleted) = {
            let mut ctx = self.context();
            changes::repair_tree(&mut ctx)?
        };
        report.sequences_repaired = repaired;
        report.sequences_deleted = deleted;
        self.pool.clear_all_flags();

        event!(
            Level::DEBUG,
            repaired,
            deleted,
            flagged = report.states_flagged,
            "applied model changes"
        );
        Ok(report)
    }

    /// Emit the whole tree as a stable text dump.
    pub fn save(&self) -> Result<String> {
        serial::emit(&self.model, &self.pool, &self.tree, &self.histories)
    }

    /// Rebuild a solver from a dump written by [`save`](Self::save).
    ///
    /// The random stream restarts from the configured seed; the dump
    /// carries no RNG state.
    pub fn load(model: M, heuristic: H, config: SolverConfig, dump: &str) -> Result<Self> {
        let discount = config.discount_factor.unwrap_or(model.discount_factor());
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(PlannerError::ModelContract(format!(
                "discount factor {discount} outside (0, 1]"
            )));
        }
        let rng = PlannerRng::seed_from_u64(config.seed);
        let (pool, tree, histories) = serial::parse(&model, config.observation_threshold, dump)?;
        Ok(Self {
            config,
            model,
            heuristic,
            rng,
            discount,
            pool,
            histories,
            tree,
            simulations_total: 0,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Effective backup discount γ.
    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn tree(&self) -> &BeliefTree<M> {
        &self.tree
    }

    pub fn pool(&self) -> &StatePool<M> {
        &self.pool
    }

    pub fn histories(&self) -> &Histories<M> {
        &self.histories
    }

    /// Verify every structural invariant of the tree. Intended for
    /// tests and debugging.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.tree.check_invariants(&self.histories, self.discount)
    }
}
