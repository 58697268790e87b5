//! Tiny problem models shared by the integration tests.
#![allow(dead_code)]

use abtree_core::{
    ActionSpace, ChangeEffect, ChangeFlags, Model, PlannerError, PlannerRng, Result, Step,
};
use rand::Rng;

/// One state, one action, one observation, reward +1 per step.
#[derive(Debug)]
pub struct TrivialMdp;

impl Model for TrivialMdp {
    type State = ();
    type Action = ();
    type Observation = ();
    type Change = ();

    fn sample_initial_state(&self, _rng: &mut PlannerRng) {}

    fn step(&self, _rng: &mut PlannerRng, _state: &(), _action: &()) -> Step<Self> {
        Step {
            next_state: (),
            observation: (),
            reward: 1.0,
            terminal: false,
        }
    }

    fn is_terminal(&self, _state: &()) -> bool {
        false
    }

    fn discount_factor(&self) -> f64 {
        0.9
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discretized { bins: 1 }
    }

    fn action_bin(&self, _action: &()) -> Option<usize> {
        Some(0)
    }

    fn sample_action(&self, bin: usize) -> Result<()> {
        if bin == 0 {
            Ok(())
        } else {
            Err(PlannerError::ModelContract(format!("no bin {bin}")))
        }
    }
}

/// Two deterministic arms paying 0 and 1; terminal after one pull.
pub struct TwoArmBandit;

impl Model for TwoArmBandit {
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
        ActionSpace::Discretized { bins: 2 }
    }

    fn action_bin(&self, action: &usize) -> Option<usize> {
        Some(*action)
    }

    fn sample_action(&self, bin: usize) -> Result<usize> {
        if bin < 2 {
            Ok(bin)
        } else {
            Err(PlannerError::ModelContract(format!("no bin {bin}")))
        }
    }
}

/// One action; observation A (reward +1) or B (reward −1) with equal
/// probability; terminal after one step.
pub struct ObservationSplit;

impl Model for ObservationSplit {
    type State = u8;
    type Action = ();
    type Observation = char;
    type Change = ();

    fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
        0
    }

    fn step(&self, rng: &mut PlannerRng, _state: &u8, _action: &()) -> Step<Self> {
        let heads = rng.gen_bool(0.5);
        Step {
            next_state: 1,
            observation: if heads { 'A' } else { 'B' },
            reward: if heads { 1.0 } else { -1.0 },
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
        ActionSpace::Discretized { bins: 1 }
    }

    fn action_bin(&self, _action: &()) -> Option<usize> {
        Some(0)
    }

    fn sample_action(&self, _bin: usize) -> Result<()> {
        Ok(())
    }
}

/// Deterministic walk along a chain; reward +1 per step, never
/// terminal. Its only change flags every state `TRANSITION_BEFORE`.
pub struct Chain;

impl Model for Chain {
    type State = u32;
    type Action = ();
    type Observation = u32;
    type Change = ();

    fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u32 {
        0
    }

    fn step(&self, _rng: &mut PlannerRng, state: &u32, _action: &()) -> Step<Self> {
        Step {
            next_state: state + 1,
            observation: state + 1,
            reward: 1.0,
            terminal: false,
        }
    }

    fn is_terminal(&self, _state: &u32) -> bool {
        false
    }

    fn discount_factor(&self) -> f64 {
        0.9
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discretized { bins: 1 }
    }

    fn action_bin(&self, _action: &()) -> Option<usize> {
        Some(0)
    }

    fn sample_action(&self, _bin: usize) -> Result<()> {
        Ok(())
    }

    fn apply_change(&mut self, _change: &()) -> Result<ChangeEffect> {
        Ok(ChangeEffect::global(ChangeFlags::TRANSITION_BEFORE))
    }

    fn format_state(&self, state: &u32) -> String {
        state.to_string()
    }

    fn parse_state(&self, text: &str) -> Result<u32> {
        text.parse()
            .map_err(|_| PlannerError::mismatch(0, format!("bad chain state {text:?}")))
    }

    fn format_action(&self, _action: &()) -> String {
        "advance".to_string()
    }

    fn parse_action(&self, text: &str) -> Result<()> {
        if text == "advance" {
            Ok(())
        } else {
            Err(PlannerError::mismatch(0, format!("bad chain action {text:?}")))
        }
    }

    fn format_observation(&self, observation: &u32) -> String {
        observation.to_string()
    }

    fn parse_observation(&self, text: &str) -> Result<u32> {
        text.parse()
            .map_err(|_| PlannerError::mismatch(0, format!("bad chain observation {text:?}")))
    }
}

/// Walks right one cell per step until a wall is installed. The wall's
/// change reports no region and no flags, so the repair sweep can only
/// find the dead states through `is_valid`.
pub struct Gate {
    limit: Option<u32>,
}

impl Gate {
    pub fn open() -> Self {
        Self { limit: None }
    }
}

impl Model for Gate {
    type State = u32;
    type Action = ();
    type Observation = u32;
    type Change = u32;

    fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u32 {
        0
    }

    fn step(&self, _rng: &mut PlannerRng, state: &u32, _action: &()) -> Step<Self> {
        let next = state + 1;
        let blocked = self.limit.is_some_and(|limit| next >= limit);
        let (next_state, reward) = if blocked { (*state, -1.0) } else { (next, 1.0) };
        Step {
            next_state,
            observation: next_state,
            reward,
            terminal: false,
        }
    }

    fn is_terminal(&self, _state: &u32) -> bool {
        false
    }

    fn is_valid(&self, state: &u32) -> bool {
        self.limit.map_or(true, |limit| *state < limit)
    }

    fn discount_factor(&self) -> f64 {
        0.9
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discretized { bins: 1 }
    }

    fn action_bin(&self, _action: &()) -> Option<usize> {
        Some(0)
    }

    fn sample_action(&self, _bin: usize) -> Result<()> {
        Ok(())
    }

    fn apply_change(&mut self, change: &u32) -> Result<ChangeEffect> {
        self.limit = Some(*change);
        Ok(ChangeEffect::global(ChangeFlags::empty()))
    }
}

/// Model whose reward diverges, for the fatal-error path.
pub struct BrokenReward;

impl Model for BrokenReward {
    type State = u8;
    type Action = usize;
    type Observation = u8;
    type Change = ();

    fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
        0
    }

    fn step(&self, _rng: &mut PlannerRng, _state: &u8, _action: &usize) -> Step<Self> {
        Step {
            next_state: 1,
            observation: 0,
            reward: f64::INFINITY,
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
        ActionSpace::Discretized { bins: 1 }
    }

    fn action_bin(&self, action: &usize) -> Option<usize> {
        Some(*action)
    }

    fn sample_action(&self, bin: usize) -> Result<usize> {
        Ok(bin)
    }
}
