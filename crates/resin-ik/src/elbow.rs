//! Hinge constraint for elbows and knees.

use crate::constraint::RotationConstraint;
use crate::math::{signed_twist_angle, swing_twist_decomposition};
use glam::{Quat, Vec3};
use std::f32::consts::PI;

/// Swing components with `|w|` above this are treated as no swing.
const MAX_HINGE_SWING_W: f32 = 0.99999;

/// Restricts a joint to rotate about a single axis within an angle range.
#[derive(Debug, Clone)]
pub struct ElbowConstraint {
    reference_rotation: Quat,
    /// Hinge axis in the parent frame.
    axis: Vec3,
    perpendicular: Vec3,
    min_angle: f32,
    max_angle: f32,
    configured: (f32, f32),
}

impl ElbowConstraint {
    /// Creates a hinge about `axis` (parent frame) with no angle limit.
    pub fn new(reference_rotation: Quat, axis: Vec3) -> Self {
        let axis = axis.try_normalize().unwrap_or(Vec3::Z);
        Self {
            reference_rotation,
            axis,
            perpendicular: axis.any_orthonormal_vector(),
            min_angle: -PI,
            max_angle: PI,
            configured: (-PI, PI),
        }
    }

    /// Sets the hinge range in radians.
    pub fn with_angle_limits(mut self, min: f32, max: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min_angle = min;
        self.max_angle = max;
        self.configured = (min, max);
        self
    }

    /// Hinge axis in the parent frame.
    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    /// Current `(min, max)` hinge angles.
    pub fn angle_limits(&self) -> (f32, f32) {
        (self.min_angle, self.max_angle)
    }

    /// Hinge angle of `rotation` measured from the reference rotation.
    ///
    /// Any off-axis swing is ignored.
    pub fn hinge_angle(&self, rotation: Quat) -> f32 {
        let post_rotation = rotation * self.reference_rotation.inverse();
        let (_, twist) = swing_twist_decomposition(post_rotation, self.axis);
        signed_twist_angle(twist, self.axis, self.perpendicular)
    }
}

impl RotationConstraint for ElbowConstraint {
    fn apply(&self, rotation: &mut Quat) -> bool {
        let post_rotation = *rotation * self.reference_rotation.inverse();
        let (swing, twist) = swing_twist_decomposition(post_rotation, self.axis);
        let angle = signed_twist_angle(twist, self.axis, self.perpendicular);
        let clamped = angle.clamp(self.min_angle, self.max_angle);

        if clamped != angle || swing.w.abs() < MAX_HINGE_SWING_W {
            *rotation =
                (Quat::from_axis_angle(self.axis, clamped) * self.reference_rotation).normalize();
            return true;
        }
        false
    }

    fn reference_rotation(&self) -> Quat {
        self.reference_rotation
    }

    fn compute_center_rotation(&self) -> Quat {
        let mid = 0.5 * (self.min_angle + self.max_angle);
        (Quat::from_axis_angle(self.axis, mid) * self.reference_rotation).normalize()
    }

    fn dynamically_adjust_limits(&mut self, rotation: Quat) {
        let (min, max) = self.configured;
        let angle = self.hinge_angle(rotation);
        self.min_angle = min.min(angle);
        self.max_angle = max.max(angle);
    }

    fn clear_history(&mut self) {
        (self.min_angle, self.max_angle) = self.configured;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knee() -> ElbowConstraint {
        ElbowConstraint::new(Quat::IDENTITY, Vec3::X).with_angle_limits(0.0, 2.0)
    }

    #[test]
    fn test_in_range_untouched() {
        let c = knee();
        let mut rotation = Quat::from_rotation_x(1.0);
        assert!(!c.apply(&mut rotation));
        assert!((c.hinge_angle(rotation) - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_clamps_to_range() {
        let c = knee();
        let mut rotation = Quat::from_rotation_x(-0.5);
        assert!(c.apply(&mut rotation));
        assert!(c.hinge_angle(rotation).abs() < 1.0e-4);

        let mut rotation = Quat::from_rotation_x(2.5);
        assert!(c.apply(&mut rotation));
        assert!((c.hinge_angle(rotation) - 2.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_off_axis_swing_removed() {
        let c = knee();
        let mut rotation = Quat::from_rotation_z(0.3) * Quat::from_rotation_x(1.0);
        assert!(c.apply(&mut rotation));

        // Only rotation about the hinge axis remains.
        let hinge = rotation * c.reference_rotation().inverse();
        assert!((hinge * Vec3::X - Vec3::X).length() < 1.0e-4);
    }

    #[test]
    fn test_reference_rotation() {
        let reference = Quat::from_rotation_y(0.7);
        let c = ElbowConstraint::new(reference, Vec3::Z).with_angle_limits(0.0, 1.0);
        let mut rotation = Quat::from_rotation_z(0.5) * reference;
        assert!(!c.apply(&mut rotation));

        let mut rotation = Quat::from_rotation_z(-0.5) * reference;
        assert!(c.apply(&mut rotation));
        assert!(rotation.dot(reference).abs() > 0.9999);
    }

    #[test]
    fn test_center_rotation() {
        let c = knee();
        let center = c.compute_center_rotation();
        assert!((c.hinge_angle(center) - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_dynamic_adjustment() {
        let mut c = knee();
        c.dynamically_adjust_limits(Quat::from_rotation_x(-0.4));
        let (min, max) = c.angle_limits();
        assert!((min + 0.4).abs() < 1.0e-4);
        assert_eq!(max, 2.0);

        c.dynamically_adjust_limits(Quat::from_rotation_x(1.0));
        assert_eq!(c.angle_limits(), (0.0, 2.0));

        c.dynamically_adjust_limits(Quat::from_rotation_x(2.8));
        c.clear_history();
        assert_eq!(c.angle_limits(), (0.0, 2.0));
    }
}
