//! Per-pass chain results and solve statistics.

use crate::accumulator::{RotationAccumulator, TranslationAccumulator};
use glam::{Quat, Vec3};

/// One joint's proposed relative pose from a single target pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointChainInfo {
    /// Proposed parent-relative rotation.
    pub rotation: Quat,
    /// Proposed parent-relative translation.
    pub translation: Vec3,
    /// Weight of the target that produced it.
    pub weight: f32,
    /// Joint index.
    pub joint: usize,
    /// A constraint (or stretch limit) clamped this proposal.
    pub constrained: bool,
}

/// Folds a chain into per-joint accumulators.
pub(crate) fn accumulate(
    chain: &[JointChainInfo],
    rotations: &mut [RotationAccumulator],
    translations: &mut [TranslationAccumulator],
) {
    for info in chain {
        if let (Some(rotation), Some(translation)) =
            (rotations.get_mut(info.joint), translations.get_mut(info.joint))
        {
            rotation.add(info.rotation, info.weight);
            translation.add(info.translation, info.weight);
        }
    }
}

/// Outcome of the last relaxation loop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveStats {
    /// Iterations run.
    pub iterations: u32,
    /// Worst positional error after the last iteration.
    pub max_error: f32,
    /// Chain entries flagged as constrained in the last iteration.
    pub constrained_joints: usize,
}
