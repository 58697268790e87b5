//! Observation mapping for large or continuous observation spaces.
//!
//! Observations are clustered under a similarity threshold τ: an
//! incoming observation is routed to the nearest cluster within τ, and
//! otherwise founds a new cluster whose representative it becomes.
//! Representatives are fixed at creation; later arrivals never shift
//! them, which keeps back-propagation idempotent and prevents tree
//! reshaping under replay.

use super::ObsEntry;
use crate::node::BeliefId;
use abtree_core::{Model, PlannerError, Result};

/// Threshold-clustered observation mapping.
#[derive(Debug)]
pub struct ApproximateObservationMap<M: Model> {
    /// Clusters in creation order; the index in this vector is the
    /// cluster id used for tie-breaking.
    clusters: Vec<ObsEntry<M>>,
    threshold: f64,
    total_visits: i64,
}

impl<M: Model> ApproximateObservationMap<M> {
    pub fn new(threshold: f64) -> Self {
        Self {
            clusters: Vec::new(),
            threshold,
            total_visits: 0,
        }
    }

    fn distance(&self, model: &M, a: &M::Observation, b: &M::Observation) -> Result<f64> {
        model.observation_distance(a, b).ok_or_else(|| {
            PlannerError::ModelContract(
                "model declared an approximate observation space but provides no distance".into(),
            )
        })
    }

    /// Index of the nearest cluster within τ. Ties on distance go to
    /// the lowest cluster id, i.e. the earliest insertion.
    fn nearest_within(&self, model: &M, observation: &M::Observation) -> Result<Option<usize>> {
        let mut best: Option<(f64, usize)> = None;
        for (id, cluster) in self.clusters.iter().enumerate() {
            let d = self.distance(model, &cluster.observation, observation)?;
            if d > self.threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((bd, _)) => d < bd,
            };
            if better {
                best = Some((d, id));
            }
        }
        Ok(best.map(|(_, id)| id))
    }

    /// The child belief of the nearest cluster within τ, if any.
    pub fn get_belief(&self, model: &M, observation: &M::Observation) -> Result<Option<BeliefId>> {
        Ok(self
            .nearest_within(model, observation)?
            .map(|id| self.clusters[id].child))
    }

    /// Route `observation` to an existing cluster, or found a new one
    /// with `child` and a copy of `observation` as representative.
    pub fn insert_child(
        &mut self,
        model: &M,
        observation: &M::Observation,
        child: BeliefId,
    ) -> Result<BeliefId> {
        if let Some(id) = self.nearest_within(model, observation)? {
            return Ok(self.clusters[id].child);
        }
        self.clusters.push(ObsEntry {
            observation: observation.clone(),
            child,
            visits: 0,
        });
        Ok(child)
    }

    pub fn update_visit_count(
        &mut self,
        model: &M,
        observation: &M::Observation,
        delta: i64,
    ) -> Result<()> {
        let id = self.nearest_within(model, observation)?.ok_or_else(|| {
            PlannerError::ModelContract(format!(
                "visit update for unrouted observation {observation:?}"
            ))
        })?;
        self.clusters[id].visits += delta;
        self.total_visits += delta;
        Ok(())
    }

    pub fn entries(&self) -> &[ObsEntry<M>] {
        &self.clusters
    }

    pub(super) fn parts_mut(&mut self) -> (&mut [ObsEntry<M>], &mut i64) {
        (&mut self.clusters, &mut self.total_visits)
    }

    pub fn total_visit_count(&self) -> i64 {
        self.total_visits
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use abtree_core::{ActionSpace, ObservationSpace, PlannerRng, Step};

    /// Observations are plain readings on the real line.
    struct ReadingModel;

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Reading(f64);

    impl Eq for Reading {}

    impl std::hash::Hash for Reading {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.0.to_bits().hash(state);
        }
    }

    impl Model for ReadingModel {
        type State = u8;
        type Action = u8;
        type Observation = Reading;
        type Change = ();

        fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
            0
        }

        fn step(&self, _rng: &mut PlannerRng, _state: &u8, _action: &u8) -> Step<Self> {
            Step {
                next_state: 0,
                observation: Reading(0.0),
                reward: 0.0,
                terminal: false,
            }
        }

        fn is_terminal(&self, _state: &u8) -> bool {
            false
        }

        fn discount_factor(&self) -> f64 {
            1.0
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discretized { bins: 1 }
        }

        fn observation_space(&self) -> ObservationSpace {
            ObservationSpace::Approximate
        }

        fn observation_distance(&self, a: &Reading, b: &Reading) -> Option<f64> {
            Some((a.0 - b.0).abs())
        }
    }

    fn belief_ids(n: usize) -> Vec<BeliefId> {
        let mut arena: Arena<u8> = Arena::new();
        (0..n).map(|_| BeliefId(arena.insert(0))).collect()
    }

    /// Feed 0.00, 0.05, 0.09, 0.11, 0.20 with τ = 0.1: the first three
    /// share the 0.00 cluster, 0.11 founds a second cluster, and 0.20
    /// joins it (|0.20 − 0.11| ≤ 0.1).
    #[test]
    fn test_clustering_sequence() {
        let model = ReadingModel;
        let ids = belief_ids(5);
        let mut map: ApproximateObservationMap<ReadingModel> =
            ApproximateObservationMap::new(0.1);

        for (i, x) in [0.00, 0.05, 0.09, 0.11, 0.20].into_iter().enumerate() {
            let obs = Reading(x);
            let routed = match map.get_belief(&model, &obs).unwrap() {
                Some(existing) => existing,
                None => map.insert_child(&model, &obs, ids[i]).unwrap(),
            };
            map.update_visit_count(&model, &obs, 1).unwrap();
            let _ = routed;
        }

        assert_eq!(map.entries().len(), 2);
        assert_eq!(map.entries()[0].observation, Reading(0.00));
        assert_eq!(map.entries()[0].visits, 3);
        assert_eq!(map.entries()[1].observation, Reading(0.11));
        assert_eq!(map.entries()[1].visits, 2);
        assert_eq!(map.total_visit_count(), 5);
    }

    #[test]
    fn test_identical_observation_routes_to_same_child() {
        let model = ReadingModel;
        let ids = belief_ids(2);
        let mut map: ApproximateObservationMap<ReadingModel> =
            ApproximateObservationMap::new(0.1);

        map.insert_child(&model, &Reading(0.5), ids[0]).unwrap();
        let first = map.get_belief(&model, &Reading(0.5)).unwrap();
        let second = map.get_belief(&model, &Reading(0.5)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Some(ids[0]));
    }

    #[test]
    fn test_tie_breaks_to_earliest_cluster() {
        let model = ReadingModel;
        let ids = belief_ids(2);
        let mut map: ApproximateObservationMap<ReadingModel> =
            ApproximateObservationMap::new(1.0);

        // Representatives at 0.0 and 1.0; an observation at 0.5 is
        // equidistant and must go to the earlier cluster.
        map.insert_child(&model, &Reading(0.0), ids[0]).unwrap();
        map.clusters.push(ObsEntry {
            observation: Reading(1.0),
            child: ids[1],
            visits: 0,
        });

        assert_eq!(map.get_belief(&model, &Reading(0.5)).unwrap(), Some(ids[0]));
    }

    #[test]
    fn test_representative_fixed_at_creation() {
        let model = ReadingModel;
        let ids = belief_ids(1);
        let mut map: ApproximateObservationMap<ReadingModel> =
            ApproximateObservationMap::new(0.1);

        map.insert_child(&model, &Reading(0.0), ids[0]).unwrap();
        // Absorbing 0.09 must not drag the representative toward it:
        // 0.15 is within τ of 0.09 but not of the representative.
        map.update_visit_count(&model, &Reading(0.09), 1).unwrap();
        assert_eq!(map.get_belief(&model, &Reading(0.15)).unwrap(), None);
    }

    #[test]
    fn test_missing_distance_is_contract_violation() {
        struct NoDistance;

        impl Model for NoDistance {
            type State = u8;
            type Action = u8;
            type Observation = u8;
            type Change = ();

            fn sample_initial_state(&self, _rng: &mut PlannerRng) -> u8 {
                0
            }

            fn step(&self, _rng: &mut PlannerRng, _state: &u8, _action: &u8) -> Step<Self> {
                Step {
                    next_state: 0,
                    observation: 0,
                    reward: 0.0,
                    terminal: false,
                }
            }

            fn is_terminal(&self, _state: &u8) -> bool {
                false
            }

            fn discount_factor(&self) -> f64 {
                1.0
            }

            fn action_space(&self) -> ActionSpace {
                ActionSpace::Discretized { bins: 1 }
            }

            fn observation_space(&self) -> ObservationSpace {
                ObservationSpace::Approximate
            }
        }

        let ids = belief_ids(1);
        let mut map: ApproximateObservationMap<NoDistance> =
            ApproximateObservationMap::new(0.1);
        map.clusters.push(ObsEntry {
            observation: 0,
            child: ids[0],
            visits: 0,
        });

        let err = map.get_belief(&NoDistance, &1).unwrap_err();
        assert!(matches!(err, PlannerError::ModelContract(_)));
    }
}
