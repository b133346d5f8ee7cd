//! Constraint-based inverse kinematics overlay for resin.
//!
//! [`InverseKinematics`] takes the pose an animation produced and bends it so
//! named joints reach targets read from animation variables. Chains are
//! solved with cyclic coordinate descent, spines with a Hermite spline, and
//! every joint stays inside its humanoid [`RotationConstraint`].
//!
//! ```ignore
//! let mut ik = InverseKinematics::new(IkConfig::default());
//! ik.set_skeleton(skeleton);
//! ik.set_target_var(IkTargetVar::new("LeftHand").with_position_var("leftHandPosition"));
//! let poses = ik.overlay(&vars, &AnimContext::default(), dt, &under_poses);
//! ```

mod accumulator;
mod ccd;
mod chain;
mod config;
mod constraint;
mod elbow;
mod error;
mod humanoid;
mod math;
mod pose;
mod skeleton;
mod solver;
mod spline;
mod swing_twist;
mod target;
mod variables;

pub use accumulator::{RotationAccumulator, TranslationAccumulator};
pub use ccd::MAX_CHAIN_DEPTH;
pub use chain::{JointChainInfo, SolveStats};
pub use config::{IkConfig, SolutionSource};
pub use constraint::{ConstraintMap, RotationConstraint};
pub use elbow::ElbowConstraint;
pub use error::SkeletonError;
pub use humanoid::{LIMBS, humanoid_constraint, humanoid_constraints, limit_center_poses};
pub use math::{signed_twist_angle, swing_twist_decomposition};
pub use pose::Pose;
pub use skeleton::{Joint, Skeleton};
pub use solver::InverseKinematics;
pub use spline::{SplineJointInfo, compute_spline_joint_infos};
pub use swing_twist::{SWING_SUBDIVISIONS, SwingLimitFunction, SwingTwistConstraint, swing_theta};
pub use target::{IkTarget, IkTargetType, IkTargetVar, MAX_FLEX_COEFFICIENTS};
pub use variables::{AnimContext, AnimVariables, VariableMap, Variant};
