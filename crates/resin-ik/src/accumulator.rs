//! Weighted averaging of per-joint IK contributions.
//!
//! Several targets may want to rotate the same joint in one iteration.
//! Each solver adds its proposal with the target's weight and the
//! accumulators produce the blended result.

use glam::{Quat, Vec3};

const ZERO_QUAT: Quat = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);

/// Weighted average of rotations.
///
/// Each contribution is sign-aligned with the running sum before it is
/// added, so `q` and `-q` reinforce instead of cancelling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationAccumulator {
    sum: Quat,
    total_weight: f32,
    dirty: bool,
}

impl Default for RotationAccumulator {
    fn default() -> Self {
        Self {
            sum: ZERO_QUAT,
            total_weight: 0.0,
            dirty: false,
        }
    }
}

impl RotationAccumulator {
    /// Adds `rotation` with `weight`.
    pub fn add(&mut self, rotation: Quat, weight: f32) {
        let sign = if self.sum.dot(rotation) < 0.0 { -1.0 } else { 1.0 };
        self.sum = self.sum + rotation * (sign * weight);
        self.total_weight += weight;
        self.dirty = true;
    }

    /// Number of contributions is zero or their weights summed to zero.
    pub fn is_empty(&self) -> bool {
        self.total_weight <= 0.0
    }

    /// Sum of all contribution weights.
    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    /// Normalized weighted average, or identity if nothing was added.
    pub fn average(&self) -> Quat {
        if self.is_empty() || self.sum.length_squared() <= f32::EPSILON {
            return Quat::IDENTITY;
        }
        self.sum.normalize()
    }

    /// True if anything was ever added since the last [`clear_and_clean`].
    ///
    /// [`clear_and_clean`]: Self::clear_and_clean
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resets the sum, keeping the dirty flag.
    pub fn clear(&mut self) {
        self.sum = ZERO_QUAT;
        self.total_weight = 0.0;
    }

    /// Resets the sum and the dirty flag.
    pub fn clear_and_clean(&mut self) {
        self.clear();
        self.dirty = false;
    }
}

/// Weighted average of translations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TranslationAccumulator {
    sum: Vec3,
    total_weight: f32,
    dirty: bool,
}

impl TranslationAccumulator {
    /// Adds `translation` with `weight`.
    pub fn add(&mut self, translation: Vec3, weight: f32) {
        self.sum += translation * weight;
        self.total_weight += weight;
        self.dirty = true;
    }

    /// True if no weight has been added.
    pub fn is_empty(&self) -> bool {
        self.total_weight <= 0.0
    }

    /// Weighted mean, or zero if nothing was added.
    pub fn average(&self) -> Vec3 {
        if self.is_empty() {
            return Vec3::ZERO;
        }
        self.sum / self.total_weight
    }

    /// True if anything was ever added since the last [`clear_and_clean`].
    ///
    /// [`clear_and_clean`]: Self::clear_and_clean
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resets the sum, keeping the dirty flag.
    pub fn clear(&mut self) {
        self.sum = Vec3::ZERO;
        self.total_weight = 0.0;
    }

    /// Resets the sum and the dirty flag.
    pub fn clear_and_clean(&mut self) {
        self.clear();
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rotation_is_identity() {
        let acc = RotationAccumulator::default();
        assert!(acc.is_empty());
        assert_eq!(acc.average(), Quat::IDENTITY);
        assert!(!acc.is_dirty());
    }

    #[test]
    fn test_rotation_average_of_opposite_signs() {
        let q = Quat::from_rotation_z(0.5);
        let mut acc = RotationAccumulator::default();
        acc.add(q, 1.0);
        acc.add(-q, 1.0);

        assert!(acc.average().dot(q).abs() > 0.9999);
    }

    #[test]
    fn test_rotation_weighted_average() {
        let mut acc = RotationAccumulator::default();
        acc.add(Quat::IDENTITY, 1.0);
        acc.add(Quat::from_rotation_x(1.0), 1.0);

        let expected = Quat::from_rotation_x(0.5);
        assert!(acc.average().dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_clear_keeps_dirty() {
        let mut acc = RotationAccumulator::default();
        acc.add(Quat::IDENTITY, 1.0);
        acc.clear();
        assert!(acc.is_empty());
        assert!(acc.is_dirty());

        acc.clear_and_clean();
        assert!(!acc.is_dirty());
    }

    #[test]
    fn test_translation_mean() {
        let mut acc = TranslationAccumulator::default();
        acc.add(Vec3::new(1.0, 0.0, 0.0), 1.0);
        acc.add(Vec3::new(4.0, 0.0, 0.0), 2.0);

        assert!((acc.average() - Vec3::new(3.0, 0.0, 0.0)).length() < 1.0e-6);
        acc.clear();
        assert_eq!(acc.average(), Vec3::ZERO);
        assert!(acc.is_dirty());
    }
}
