//! A 1-D continuous-control toy.
//!
//! The agent moves along a line toward a goal, choosing real-valued
//! displacements, and receives noisy position readings. Obstacles can
//! be inserted mid-run, which invalidates states inside them and forces
//! the transitions around them to be redone.

use abtree_core::{
    ActionChooser, ActionSpace, ChangeEffect, ChangeFlags, Model, ObservationSpace,
    PerturbationChooser, PlannerError, PlannerRng, Result, Step,
};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Position on the line. Compares and hashes by bit pattern.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineState {
    pub x: f64,
}

impl Eq for LineState {}

impl std::hash::Hash for LineState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
    }
}

/// A displacement along the line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineAction {
    pub delta: f64,
}

/// A noisy position reading. Compares and hashes by bit pattern.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineObservation {
    pub reading: f64,
}

impl Eq for LineObservation {}

impl std::hash::Hash for LineObservation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reading.to_bits().hash(state);
    }
}

/// Insert an impassable interval.
#[derive(Clone, Copy, Debug)]
pub struct AddObstacle {
    pub low: f64,
    pub high: f64,
}

/// The line-exploration problem.
#[derive(Clone, Debug)]
pub struct LineExplore {
    pub goal: f64,
    pub span: f64,
    /// Standard deviation of the observation noise.
    pub sensor_noise: f64,
    obstacles: Vec<(f64, f64)>,
}

impl Default for LineExplore {
    fn default() -> Self {
        Self {
            goal: 5.0,
            span: 10.0,
            sensor_noise: 0.05,
            obstacles: Vec::new(),
        }
    }
}

impl LineExplore {
    /// A noiseless variant, handy for reproducible repair tests.
    pub fn deterministic() -> Self {
        Self {
            sensor_noise: 0.0,
            ..Self::default()
        }
    }

    fn blocked(&self, x: f64) -> bool {
        self.obstacles.iter().any(|&(lo, hi)| x >= lo && x <= hi)
    }

    fn at_goal(&self, x: f64) -> bool {
        (x - self.goal).abs() < 0.5
    }
}

impl Model for LineExplore {
    type State = LineState;
    type Action = LineAction;
    type Observation = LineObservation;
    type Change = AddObstacle;

    fn sample_initial_state(&self, rng: &mut PlannerRng) -> LineState {
        LineState {
            x: rng.gen_range(-0.5..0.5),
        }
    }

    fn step(&self, rng: &mut PlannerRng, state: &LineState, action: &LineAction) -> Step<Self> {
        let raw = (state.x + action.delta).clamp(-self.span, self.span);
        let hit_obstacle = self.blocked(raw);
        let x = if hit_obstacle { state.x } else { raw };

        let reading = if self.sensor_noise > 0.0 {
            let noise = Normal::new(0.0, self.sensor_noise).expect("finite noise");
            x + noise.sample(rng)
        } else {
            x
        };

        let reached = self.at_goal(x);
        let reward = if reached {
            10.0
        } else if hit_obstacle {
            -5.0
        } else {
            -(x - self.goal).abs() * 0.1
        };

        Step {
            next_state: LineState { x },
            observation: LineObservation { reading },
            reward,
            terminal: reached,
        }
    }

    fn is_terminal(&self, state: &LineState) -> bool {
        self.at_goal(state.x)
    }

    fn is_valid(&self, state: &LineState) -> bool {
        !self.blocked(state.x)
    }

    fn heuristic_value(&self, state: &LineState) -> f64 {
        -(state.x - self.goal).abs() * 0.1
    }

    fn discount_factor(&self) -> f64 {
        0.95
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Continuous {
            fixed_actions: vec![vec![-1.0], vec![1.0]],
            randomize_fixed: false,
        }
    }

    fn action_construction(&self, action: &LineAction) -> Option<Vec<f64>> {
        Some(vec![action.delta])
    }

    fn construct_action(&self, vector: &[f64]) -> Result<LineAction> {
        match vector {
            [delta] => Ok(LineAction { delta: *delta }),
            _ => Err(PlannerError::ModelContract(format!(
                "line actions take one dimension, got {vector:?}"
            ))),
        }
    }

    fn create_chooser(&self) -> Box<dyn ActionChooser> {
        Box::new(PerturbationChooser::new(1, 0.5, 8))
    }

    fn restore_chooser(&self, tag: &str, state: &str) -> Result<Box<dyn ActionChooser>> {
        match tag {
            "perturb" => Ok(Box::new(PerturbationChooser::restore(1, 0.5, 8, state))),
            _ => Err(PlannerError::ModelContract(format!(
                "unknown chooser tag {tag:?}"
            ))),
        }
    }

    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::Approximate
    }

    fn observation_distance(&self, a: &LineObservation, b: &LineObservation) -> Option<f64> {
        Some((a.reading - b.reading).abs())
    }

    fn state_variable_count(&self) -> Option<usize> {
        Some(1)
    }

    fn state_coordinates(&self, state: &LineState) -> Vec<f64> {
        vec![state.x]
    }

    fn apply_change(&mut self, change: &AddObstacle) -> Result<ChangeEffect> {
        if change.low > change.high {
            return Err(PlannerError::ChangeUnapplicable(format!(
                "obstacle interval [{}, {}] is inverted",
                change.low, change.high
            )));
        }
        self.obstacles.push((change.low, change.high));
        Ok(ChangeEffect::boxed(
            vec![change.low],
            vec![change.high],
            ChangeFlags::DELETED | ChangeFlags::TRANSITION_BEFORE,
        ))
    }

    fn format_state(&self, state: &LineState) -> String {
        format!("{:?}", state.x)
    }

    fn parse_state(&self, text: &str) -> Result<LineState> {
        text.parse()
            .map(|x| LineState { x })
            .map_err(|_| PlannerError::mismatch(0, format!("bad line state {text:?}")))
    }

    fn format_action(&self, action: &LineAction) -> String {
        format!("{:?}", action.delta)
    }

    fn parse_action(&self, text: &str) -> Result<LineAction> {
        text.parse()
            .map(|delta| LineAction { delta })
            .map_err(|_| PlannerError::mismatch(0, format!("bad line action {text:?}")))
    }

    fn format_observation(&self, observation: &LineObservation) -> String {
        format!("{:?}", observation.reading)
    }

    fn parse_observation(&self, text: &str) -> Result<LineObservation> {
        text.parse()
            .map(|reading| LineObservation { reading })
            .map_err(|_| PlannerError::mismatch(0, format!("bad line observation {text:?}")))
    }
}
