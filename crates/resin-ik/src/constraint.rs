//! Joint rotation limits.
//!
//! Constraints clamp a joint's parent-relative rotation into an anatomical
//! range. Two shapes exist: [`SwingTwistConstraint`](crate::SwingTwistConstraint)
//! for ball joints (shoulders, hips, spine, neck) and
//! [`ElbowConstraint`](crate::ElbowConstraint) for single-axis hinges
//! (elbows, knees).

use glam::Quat;
use std::collections::BTreeMap;

/// A limit on a joint's parent-relative rotation.
pub trait RotationConstraint: Send + Sync + std::fmt::Debug {
    /// Clamps `rotation` into the allowed range.
    ///
    /// Returns true if the rotation was modified. The result is always a
    /// valid unit rotation.
    fn apply(&self, rotation: &mut Quat) -> bool;

    /// The joint's "zero" rotation the limits are measured from.
    fn reference_rotation(&self) -> Quat;

    /// Rotation at the middle of the allowed range.
    fn compute_center_rotation(&self) -> Quat;

    /// Widens the limits so that `rotation` is allowed.
    ///
    /// Called with the underlying animation's rotation each frame, so the
    /// solver never clamps motion the animation itself asked for. Any
    /// widening from the previous call is undone first.
    fn dynamically_adjust_limits(&mut self, rotation: Quat);

    /// Restores the configured limits, discarding dynamic adjustments.
    fn clear_history(&mut self);

    /// Whether the joint belongs to the lower spine.
    ///
    /// Lower-spine joints only twist when solving hand and foot targets.
    fn is_lower_spine(&self) -> bool {
        false
    }
}

/// Constraints keyed by joint index.
pub type ConstraintMap = BTreeMap<usize, Box<dyn RotationConstraint>>;
