//! IK target bindings and their per-frame instances.

use crate::pose::Pose;
use glam::{Quat, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of per-depth flex coefficients a target can carry.
pub const MAX_FLEX_COEFFICIENTS: usize = 10;

/// How a target drives its joint.
///
/// The integer values are what animation variables use to select a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IkTargetType {
    /// Reach a position and orientation.
    #[default]
    RotationAndPosition = 0,
    /// Match an orientation only, applied after the main solve.
    RotationOnly = 1,
    /// Head driven by a head-mounted display; position is met by moving the hips.
    HmdHead = 2,
    /// Like [`RotationAndPosition`](Self::RotationAndPosition) but follows hips displacement.
    HipsRelativeRotationAndPosition = 3,
    /// Solved by fitting a curve from the hips to the tip.
    Spline = 4,
    /// Disabled for this frame.
    Unknown = 5,
}

impl From<i32> for IkTargetType {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::RotationAndPosition,
            1 => Self::RotationOnly,
            2 => Self::HmdHead,
            3 => Self::HipsRelativeRotationAndPosition,
            4 => Self::Spline,
            _ => Self::Unknown,
        }
    }
}

impl IkTargetType {
    /// Whether this type contributes to the positional error.
    pub fn has_position(self) -> bool {
        matches!(
            self,
            Self::RotationAndPosition | Self::HmdHead | Self::HipsRelativeRotationAndPosition
        )
    }
}

/// Binds a joint to the animation variables that drive it.
///
/// Registered once at rig setup. The joint name is resolved against the
/// skeleton lazily and re-resolved after every rebind.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IkTargetVar {
    /// Name of the driven joint.
    pub joint_name: String,
    /// Variable holding the target position (rig space).
    pub position_var: String,
    /// Variable holding the target rotation (rig space).
    pub rotation_var: String,
    /// Variable holding the target type as an int.
    pub type_var: String,
    /// Variable holding the weight.
    pub weight_var: String,
    /// Weight used when `weight_var` is unbound.
    pub weight: f32,
    /// Per-depth flex coefficients, tip first.
    pub flex_coefficients: Vec<f32>,
    /// Variable enabling the pole vector.
    pub pole_vector_enabled_var: String,
    /// Variable holding the reference vector in the mid joint's frame.
    pub pole_reference_vector_var: String,
    /// Variable holding the pole vector (rig space).
    pub pole_vector_var: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) joint_index: Option<usize>,
}

impl IkTargetVar {
    /// Creates a binding for `joint_name` with no variables and weight 1.
    pub fn new(joint_name: impl Into<String>) -> Self {
        Self {
            joint_name: joint_name.into(),
            position_var: String::new(),
            rotation_var: String::new(),
            type_var: String::new(),
            weight_var: String::new(),
            weight: 1.0,
            flex_coefficients: Vec::new(),
            pole_vector_enabled_var: String::new(),
            pole_reference_vector_var: String::new(),
            pole_vector_var: String::new(),
            joint_index: None,
        }
    }

    /// Sets the position variable.
    pub fn with_position_var(mut self, name: impl Into<String>) -> Self {
        self.position_var = name.into();
        self
    }

    /// Sets the rotation variable.
    pub fn with_rotation_var(mut self, name: impl Into<String>) -> Self {
        self.rotation_var = name.into();
        self
    }

    /// Sets the type variable.
    pub fn with_type_var(mut self, name: impl Into<String>) -> Self {
        self.type_var = name.into();
        self
    }

    /// Sets the weight variable.
    pub fn with_weight_var(mut self, name: impl Into<String>) -> Self {
        self.weight_var = name.into();
        self
    }

    /// Sets the default weight.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the flex coefficients. Extra entries are dropped.
    pub fn with_flex_coefficients(mut self, coefficients: &[f32]) -> Self {
        let count = coefficients.len().min(MAX_FLEX_COEFFICIENTS);
        self.flex_coefficients = coefficients[..count].to_vec();
        self
    }

    /// Sets the three pole-vector variables.
    pub fn with_pole_vector_vars(
        mut self,
        enabled: impl Into<String>,
        reference_vector: impl Into<String>,
        pole_vector: impl Into<String>,
    ) -> Self {
        self.pole_vector_enabled_var = enabled.into();
        self.pole_reference_vector_var = reference_vector.into();
        self.pole_vector_var = pole_vector.into();
        self
    }

    /// Resolved joint index, if the binding has been resolved.
    pub fn joint_index(&self) -> Option<usize> {
        self.joint_index
    }
}

/// A resolved target for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct IkTarget {
    /// Target type.
    pub target_type: IkTargetType,
    /// Driven joint.
    pub index: usize,
    /// Target rotation in skeleton space.
    pub rotation: Quat,
    /// Target position in skeleton space.
    pub translation: Vec3,
    /// Blend weight against other targets sharing joints.
    pub weight: f32,
    /// Per-depth flex coefficients, tip first.
    pub flex_coefficients: Vec<f32>,
    /// Apply the pole-vector correction.
    pub pole_vector_enabled: bool,
    /// Desired bend direction (unit length).
    pub pole_vector: Vec3,
    /// Bend reference in the mid joint's frame (unit length).
    pub pole_reference_vector: Vec3,
}

impl IkTarget {
    /// Creates a target with weight 1 and no flex limits.
    pub fn new(target_type: IkTargetType, index: usize, pose: Pose) -> Self {
        Self {
            target_type,
            index,
            rotation: pose.rotation,
            translation: pose.translation,
            weight: 1.0,
            flex_coefficients: Vec::new(),
            pole_vector_enabled: false,
            pole_vector: Vec3::Z,
            pole_reference_vector: Vec3::Z,
        }
    }

    /// Target pose.
    pub fn pose(&self) -> Pose {
        Pose::new(self.translation, self.rotation)
    }

    /// Sets the target pose.
    pub fn set_pose(&mut self, pose: Pose) {
        self.rotation = pose.rotation;
        self.translation = pose.translation;
    }

    /// Flex coefficient at `depth` (0 is the tip); 1.0 past the end.
    pub fn flex_coefficient(&self, depth: usize) -> f32 {
        self.flex_coefficients.get(depth).copied().unwrap_or(1.0)
    }
}
