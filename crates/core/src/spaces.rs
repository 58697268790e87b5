//! Action and observation space descriptors, and the chooser contract
//! for continuous action spaces.

use crate::PlannerRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// How a model's action space is organized.
#[derive(Debug, Clone)]
pub enum ActionSpace {
    /// A fixed number of bins; untried bins are explored in a
    /// model-defined order before bandit selection takes over.
    Discretized {
        /// Total number of action bins.
        bins: usize,
    },

    /// Actions are built from real-valued construction vectors, with an
    /// optional set of fixed "hybrid" actions tried before the chooser.
    Continuous {
        /// Construction vectors of the fixed actions, tried first.
        fixed_actions: Vec<Vec<f64>>,
        /// Hint: shuffle the fixed actions instead of keeping model order.
        randomize_fixed: bool,
    },
}

/// How a model's observation space is organized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSpace {
    /// Observations compared by equality; one child belief per value.
    Exact,
    /// Observations clustered under a similarity threshold.
    Approximate,
}

/// Read-only view of one continuous action entry, handed to the chooser.
#[derive(Debug, Clone)]
pub struct ChooserEntry {
    /// Construction vector of the entry's action.
    pub vector: Vec<f64>,
    /// Number of times the entry has been visited.
    pub visit_count: i64,
    /// Mean Q-value of the entry (−∞ if unvisited).
    pub mean_q: f64,
}

/// Proposes new continuous actions from the statistics of existing ones.
///
/// A chooser is owned by a single continuous action mapping and persists
/// across simulations; its state is serialized with the mapping under
/// [`tag`](ActionChooser::tag) and restored through
/// [`Model::restore_chooser`](crate::Model::restore_chooser).
pub trait ActionChooser: std::fmt::Debug {
    /// Propose a construction vector for a new action, or `None` when
    /// this mapping should fall back to bandit selection for good.
    fn propose(&mut self, entries: &[ChooserEntry], rng: &mut PlannerRng) -> Option<Vec<f64>>;

    /// Registry tag identifying the chooser kind in tree dumps.
    fn tag(&self) -> &'static str;

    /// Opaque single-line state blob persisted alongside the tag.
    fn save_state(&self) -> String {
        String::new()
    }
}

/// Chooser that never proposes anything.
///
/// The default for models whose continuous space consists only of fixed
/// hybrid actions.
#[derive(Debug, Default)]
pub struct NullChooser;

impl ActionChooser for NullChooser {
    fn propose(&mut self, _entries: &[ChooserEntry], _rng: &mut PlannerRng) -> Option<Vec<f64>> {
        None
    }

    fn tag(&self) -> &'static str {
        "null"
    }
}

/// Chooser that perturbs the best known construction vector with
/// Gaussian noise, up to a fixed proposal budget.
#[derive(Debug)]
pub struct PerturbationChooser {
    dimensions: usize,
    spread: f64,
    budget: usize,
    proposed: usize,
}

impl PerturbationChooser {
    /// Create a chooser for `dimensions`-dimensional vectors that makes
    /// at most `budget` proposals, each drawn around the best entry
    /// with standard deviation `spread`.
    pub fn new(dimensions: usize, spread: f64, budget: usize) -> Self {
        Self {
            dimensions,
            spread,
            budget,
            proposed: 0,
        }
    }

    /// Rebuild a chooser from a state blob written by [`save_state`].
    ///
    /// [`save_state`]: ActionChooser::save_state
    pub fn restore(dimensions: usize, spread: f64, budget: usize, state: &str) -> Self {
        let proposed = state.trim().parse().unwrap_or(0);
        Self {
            dimensions,
            spread,
            budget,
            proposed,
        }
    }
}

impl ActionChooser for PerturbationChooser {
    fn propose(&mut self, entries: &[ChooserEntry], rng: &mut PlannerRng) -> Option<Vec<f64>> {
        if self.proposed >= self.budget {
            return None;
        }
        self.proposed += 1;

        let base: Vec<f64> = entries
            .iter()
            .filter(|e| e.visit_count > 0)
            .max_by(|a, b| a.mean_q.total_cmp(&b.mean_q))
            .map(|e| e.vector.clone())
            .unwrap_or_else(|| vec![0.0; self.dimensions]);

        let noise = Normal::new(0.0, self.spread).expect("finite spread");
        Some(
            base.iter()
                .map(|&x| x + noise.sample(rng))
                .collect(),
        )
    }

    fn tag(&self) -> &'static str {
        "perturb"
    }

    fn save_state(&self) -> String {
        self.proposed.to_string()
    }
}

/// Default fingerprint for a construction vector: FNV-1a over the raw
/// bit patterns of its components.
pub fn default_fingerprint(vector: &[f64]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &x in vector {
        for byte in x.to_bits().to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

/// Shuffle helper used when a model asks for its fixed actions to be
/// tried in random order.
pub fn shuffle_in_place<T>(items: &mut [T], rng: &mut PlannerRng) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_null_chooser_proposes_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut chooser = NullChooser;
        assert!(chooser.propose(&[], &mut rng).is_none());
    }

    #[test]
    fn test_perturbation_chooser_budget() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut chooser = PerturbationChooser::new(2, 0.5, 3);

        for _ in 0..3 {
            let v = chooser.propose(&[], &mut rng).expect("within budget");
            assert_eq!(v.len(), 2);
        }
        assert!(chooser.propose(&[], &mut rng).is_none());
    }

    #[test]
    fn test_perturbation_chooser_centers_on_best() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut chooser = PerturbationChooser::new(1, 0.01, 1);
        let entries = vec![
            ChooserEntry {
                vector: vec![-3.0],
                visit_count: 5,
                mean_q: 0.1,
            },
            ChooserEntry {
                vector: vec![4.0],
                visit_count: 9,
                mean_q: 2.5,
            },
        ];

        let v = chooser.propose(&entries, &mut rng).unwrap();
        assert!((v[0] - 4.0).abs() < 0.2);
    }

    #[test]
    fn test_perturbation_chooser_state_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut chooser = PerturbationChooser::new(1, 0.5, 2);
        chooser.propose(&[], &mut rng);

        let restored =
            PerturbationChooser::restore(1, 0.5, 2, &chooser.save_state());
        assert_eq!(restored.proposed, 1);
    }

    #[test]
    fn test_default_fingerprint_distinguishes_vectors() {
        assert_ne!(
            default_fingerprint(&[0.0, 1.0]),
            default_fingerprint(&[1.0, 0.0])
        );
        assert_eq!(
            default_fingerprint(&[0.25, 0.5]),
            default_fingerprint(&[0.25, 0.5])
        );
    }

    #[test]
    fn test_shuffle_deterministic_for_seed() {
        let shuffle = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut items = vec![1, 2, 3, 4, 5];
            shuffle_in_place(&mut items, &mut rng);
            items
        };
        assert_eq!(shuffle(3), shuffle(3));
    }
}
