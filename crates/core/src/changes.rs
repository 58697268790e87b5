//! Change descriptors used when the world model mutates between steps.

use bitflags::bitflags;

bitflags! {
    /// Pending change reasons attached to a pooled state during
    /// incremental tree repair.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChangeFlags: u8 {
        /// The state itself became invalid (e.g. inside a new obstacle).
        const DELETED = 1 << 0;
        /// The transition that produced this state must be redone.
        const TRANSITION_BEFORE = 1 << 1;
        /// The observation received on entering this state must be redone.
        const OBSERVATION_BEFORE = 1 << 2;
        /// The reward received on entering this state must be redone.
        const REWARD_BEFORE = 1 << 3;
    }
}

/// What a single applied model change touches.
///
/// Returned by [`Model::apply_change`](crate::Model::apply_change) after
/// the model has mutated itself. The solver uses it to flag affected
/// states in the pool before the repair sweep.
#[derive(Debug, Clone, Default)]
pub struct ChangeEffect {
    /// Axis-aligned box of affected state coordinates, as
    /// `(low_corner, high_corner)`. `None` means the change is
    /// qualitative and applies to every pooled state.
    pub region: Option<(Vec<f64>, Vec<f64>)>,

    /// Flags to attach to each affected state.
    pub flags: ChangeFlags,
}

impl ChangeEffect {
    /// A change affecting states inside the given box.
    pub fn boxed(low: Vec<f64>, high: Vec<f64>, flags: ChangeFlags) -> Self {
        Self {
            region: Some((low, high)),
            flags,
        }
    }

    /// A change affecting every pooled state.
    pub fn global(flags: ChangeFlags) -> Self {
        Self {
            region: None,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let f = ChangeFlags::DELETED | ChangeFlags::TRANSITION_BEFORE;
        assert!(f.contains(ChangeFlags::DELETED));
        assert!(f.contains(ChangeFlags::TRANSITION_BEFORE));
        assert!(!f.contains(ChangeFlags::REWARD_BEFORE));
    }

    #[test]
    fn test_effect_constructors() {
        let boxed = ChangeEffect::boxed(vec![0.0], vec![1.0], ChangeFlags::DELETED);
        assert!(boxed.region.is_some());

        let global = ChangeEffect::global(ChangeFlags::TRANSITION_BEFORE);
        assert!(global.region.is_none());
    }
}
