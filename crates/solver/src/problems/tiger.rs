//! The classic tiger problem.
//!
//! A tiger hides behind one of two doors. Listening costs a little and
//! yields a noisy hint; opening a door ends the episode with a large
//! penalty (tiger) or a reward (treasure).

use abtree_core::{ActionSpace, Model, PlannerError, PlannerRng, Result, Step};
use rand::Rng;

/// Which door the tiger is behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TigerState {
    TigerLeft,
    TigerRight,
    /// A door has been opened; the episode is over.
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TigerAction {
    Listen,
    OpenLeft,
    OpenRight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TigerObservation {
    GrowlLeft,
    GrowlRight,
    /// Heard after opening a door.
    DoorCreak,
}

/// The tiger problem with configurable listening accuracy.
#[derive(Clone, Debug)]
pub struct Tiger {
    /// Probability that a growl points at the correct door.
    pub listen_accuracy: f64,
}

impl Default for Tiger {
    fn default() -> Self {
        Self {
            listen_accuracy: 0.85,
        }
    }
}

impl Model for Tiger {
    type State = TigerState;
    type Action = TigerAction;
    type Observation = TigerObservation;
    type Change = ();

    fn sample_initial_state(&self, rng: &mut PlannerRng) -> TigerState {
        if rng.gen_bool(0.5) {
            TigerState::TigerLeft
        } else {
            TigerState::TigerRight
        }
    }

    fn step(&self, rng: &mut PlannerRng, state: &TigerState, action: &TigerAction) -> Step<Self> {
        match action {
            TigerAction::Listen => {
                let truthful = rng.gen_bool(self.listen_accuracy);
                let observation = match (state, truthful) {
                    (TigerState::TigerLeft, true) | (TigerState::TigerRight, false) => {
                        TigerObservation::GrowlLeft
                    }
                    _ => TigerObservation::GrowlRight,
                };
                Step {
                    next_state: *state,
                    observation,
                    reward: -1.0,
                    terminal: false,
                }
            }
            TigerAction::OpenLeft | TigerAction::OpenRight => {
                let tiger_side = match state {
                    TigerState::TigerLeft => TigerAction::OpenLeft,
                    TigerState::TigerRight => TigerAction::OpenRight,
                    TigerState::Done => TigerAction::OpenLeft,
                };
                let reward = if *action == tiger_side { -100.0 } else { 10.0 };
                Step {
                    next_state: TigerState::Done,
                    observation: TigerObservation::DoorCreak,
                    reward,
                    terminal: true,
                }
            }
        }
    }

    fn is_terminal(&self, state: &TigerState) -> bool {
        *state == TigerState::Done
    }

    fn heuristic_value(&self, _state: &TigerState) -> f64 {
        // Opening blind is a coin flip between +10 and -100.
        -45.0
    }

    fn discount_factor(&self) -> f64 {
        0.95
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discretized { bins: 3 }
    }

    fn action_bin(&self, action: &TigerAction) -> Option<usize> {
        Some(match action {
            TigerAction::Listen => 0,
            TigerAction::OpenLeft => 1,
            TigerAction::OpenRight => 2,
        })
    }

    fn sample_action(&self, bin: usize) -> Result<TigerAction> {
        match bin {
            0 => Ok(TigerAction::Listen),
            1 => Ok(TigerAction::OpenLeft),
            2 => Ok(TigerAction::OpenRight),
            _ => Err(PlannerError::ModelContract(format!(
                "tiger has no action bin {bin}"
            ))),
        }
    }

    fn format_state(&self, state: &TigerState) -> String {
        match state {
            TigerState::TigerLeft => "tiger-left",
            TigerState::TigerRight => "tiger-right",
            TigerState::Done => "done",
        }
        .to_string()
    }

    fn parse_state(&self, text: &str) -> Result<TigerState> {
        match text {
            "tiger-left" => Ok(TigerState::TigerLeft),
            "tiger-right" => Ok(TigerState::TigerRight),
            "done" => Ok(TigerState::Done),
            _ => Err(PlannerError::mismatch(0, format!("bad tiger state {text:?}"))),
        }
    }

    fn format_action(&self, action: &TigerAction) -> String {
        match action {
            TigerAction::Listen => "listen",
            TigerAction::OpenLeft => "open-left",
            TigerAction::OpenRight => "open-right",
        }
        .to_string()
    }

    fn parse_action(&self, text: &str) -> Result<TigerAction> {
        match text {
            "listen" => Ok(TigerAction::Listen),
            "open-left" => Ok(TigerAction::OpenLeft),
            "open-right" => Ok(TigerAction::OpenRight),
            _ => Err(PlannerError::mismatch(0, format!("bad tiger action {text:?}"))),
        }
    }

    fn format_observation(&self, observation: &TigerObservation) -> String {
        match observation {
            TigerObservation::GrowlLeft => "growl-left",
            TigerObservation::GrowlRight => "growl-right",
            TigerObservation::DoorCreak => "door-creak",
        }
        .to_string()
    }

    fn parse_observation(&self, text: &str) -> Result<TigerObservation> {
        match text {
            "growl-left" => Ok(TigerObservation::GrowlLeft),
            "growl-right" => Ok(TigerObservation::GrowlRight),
            "door-creak" => Ok(TigerObservation::DoorCreak),
            _ => Err(PlannerError::mismatch(
                0,
                format!("bad tiger observation {text:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_listening_keeps_state() {
        let model = Tiger::default();
        let mut rng = PlannerRng::seed_from_u64(0);
        let step = model.step(&mut rng, &TigerState::TigerLeft, &TigerAction::Listen);
        assert_eq!(step.next_state, TigerState::TigerLeft);
        assert!(!step.terminal);
        assert_eq!(step.reward, -1.0);
    }

    #[test]
    fn test_opening_terminates_with_signed_reward() {
        let model = Tiger::default();
        let mut rng = PlannerRng::seed_from_u64(0);

        let bad = model.step(&mut rng, &TigerState::TigerLeft, &TigerAction::OpenLeft);
        assert_eq!(bad.reward, -100.0);
        assert!(bad.terminal);

        let good = model.step(&mut rng, &TigerState::TigerLeft, &TigerAction::OpenRight);
        assert_eq!(good.reward, 10.0);
        assert!(good.terminal);
    }

    #[test]
    fn test_listen_accuracy() {
        let model = Tiger::default();
        let mut rng = PlannerRng::seed_from_u64(7);
        let mut correct = 0;
        let n = 10_000;
        for _ in 0..n {
            let step = model.step(&mut rng, &TigerState::TigerLeft, &TigerAction::Listen);
            if step.observation == TigerObservation::GrowlLeft {
                correct += 1;
            }
        }
        let rate = correct as f64 / n as f64;
        assert!((rate - 0.85).abs() < 0.02, "rate {rate}");
    }

    #[test]
    fn test_text_round_trip() {
        let model = Tiger::default();
        for state in [TigerState::TigerLeft, TigerState::TigerRight, TigerState::Done] {
            assert_eq!(model.parse_state(&model.format_state(&state)).unwrap(), state);
        }
        for action in [TigerAction::Listen, TigerAction::OpenLeft, TigerAction::OpenRight] {
            assert_eq!(
                model.parse_action(&model.format_action(&action)).unwrap(),
                action
            );
        }
        for obs in [
            TigerObservation::GrowlLeft,
            TigerObservation::GrowlRight,
            TigerObservation::DoorCreak,
        ] {
            assert_eq!(
                model
                    .parse_observation(&model.format_observation(&obs))
                    .unwrap(),
                obs
            );
        }
    }
}
