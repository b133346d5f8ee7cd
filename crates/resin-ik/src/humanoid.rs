//! Joint limits and rest poses for humanoid rigs.
//!
//! Joints are matched by name, with `Left`/`Right` prefixes stripped:
//!
//! | joint       | constraint                                   |
//! |-------------|----------------------------------------------|
//! | `Arm`       | twist ±5π/8, cone 5π/8                       |
//! | `UpLeg`     | twist ±π/2, eight-sample swing envelope      |
//! | `Hand`      | no twist limit, cone π/2                     |
//! | `Shoulder*` | twist ±π/10, cone π/12                       |
//! | `Spine*`    | twist ±π/20, elliptical π/15 × π/10          |
//! | `Neck`      | twist ±π/8, elliptical π/12 × π/10           |
//! | `Head`      | twist ±π/6, elliptical π/4 × π/3             |
//! | `ForeArm`   | hinge about ∓Z, 0 to 11π/12                  |
//! | `Leg`       | hinge about -X, 0 to 7π/8                    |
//! | `Foot`      | twist ±π/4, swing toward Y, X and diagonals  |
//!
//! `Spine` and `Spine1` are flagged as lower spine.

use crate::constraint::{ConstraintMap, RotationConstraint};
use crate::elbow::ElbowConstraint;
use crate::pose::Pose;
use crate::skeleton::Skeleton;
use crate::swing_twist::SwingTwistConstraint;
use glam::{Quat, Vec3};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Limit-center arms are lowered this far from the T-pose.
const UPPER_ARM_LOWERING: f32 = PI / 3.0;

/// Hand and foot joints paired with the base joint of their limb.
pub const LIMBS: [(&str, &str); 4] = [
    ("LeftHand", "LeftArm"),
    ("RightHand", "RightArm"),
    ("LeftFoot", "LeftUpLeg"),
    ("RightFoot", "RightUpLeg"),
];

fn split_side(name: &str) -> (&str, f32) {
    if let Some(base) = name.strip_prefix("Left") {
        (base, -1.0)
    } else if let Some(base) = name.strip_prefix("Right") {
        (base, 1.0)
    } else {
        (name, 1.0)
    }
}

fn up_leg_min_dots() -> Vec<f32> {
    // Posterior first, anterior at the fifth sample.
    let heights = [1.0, 0.5, 0.25, -1.5, -3.0, -1.5, 0.25, 0.5];
    heights
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let theta = i as f32 * FRAC_PI_4;
            Vec3::new(theta.cos(), y, theta.sin()).normalize().y
        })
        .collect()
}

/// Builds the constraint for one joint, if its name is recognised.
pub fn humanoid_constraint(name: &str, reference: Quat) -> Option<Box<dyn RotationConstraint>> {
    let (base, mirror) = split_side(name);
    let swing_twist = SwingTwistConstraint::new(reference);

    let constraint: Box<dyn RotationConstraint> = match base {
        "Arm" => Box::new(
            swing_twist
                .with_twist_limits(-5.0 * PI / 8.0, 5.0 * PI / 8.0)
                .with_cone(5.0 * PI / 8.0),
        ),
        "UpLeg" => Box::new(
            swing_twist
                .with_twist_limits(-FRAC_PI_2, FRAC_PI_2)
                .with_swing_min_dots(up_leg_min_dots()),
        ),
        "Hand" => Box::new(swing_twist.with_twist_limits(0.0, 0.0).with_cone(FRAC_PI_2)),
        _ if base.starts_with("Shoulder") => Box::new(
            swing_twist
                .with_twist_limits(-PI / 10.0, PI / 10.0)
                .with_cone(PI / 12.0),
        ),
        _ if base.starts_with("Spine") => Box::new(
            swing_twist
                .with_twist_limits(-PI / 20.0, PI / 20.0)
                .with_elliptical_swing(PI / 15.0, PI / 10.0)
                .with_lower_spine(base == "Spine" || base == "Spine1"),
        ),
        "Neck" => Box::new(
            swing_twist
                .with_twist_limits(-PI / 8.0, PI / 8.0)
                .with_elliptical_swing(PI / 12.0, PI / 10.0),
        ),
        "Head" => Box::new(
            swing_twist
                .with_twist_limits(-PI / 6.0, PI / 6.0)
                .with_elliptical_swing(FRAC_PI_4, PI / 3.0),
        ),
        "ForeArm" => Box::new(
            ElbowConstraint::new(reference, reference * (-mirror * Vec3::Z))
                .with_angle_limits(0.0, 11.0 * PI / 12.0),
        ),
        "Leg" => Box::new(
            ElbowConstraint::new(reference, reference * Vec3::NEG_X)
                .with_angle_limits(0.0, 7.0 * PI / 8.0),
        ),
        "Foot" => {
            // Parent-frame directions mapped into the joint frame.
            let inverse = reference.inverse();
            let directions = [Vec3::Y, Vec3::X, Vec3::new(1.0, 1.0, 1.0), Vec3::new(1.0, 1.0, -1.0)]
                .map(|d| inverse * d);
            Box::new(
                swing_twist
                    .with_twist_limits(-FRAC_PI_4, FRAC_PI_4)
                    .with_swung_directions(&directions),
            )
        }
        _ => return None,
    };
    Some(constraint)
}

/// Builds constraints for every recognised joint of `skeleton`.
///
/// Reference rotations are the joints' default relative rotations.
pub fn humanoid_constraints(skeleton: &Skeleton) -> ConstraintMap {
    skeleton
        .joints()
        .iter()
        .enumerate()
        .filter_map(|(index, joint)| {
            humanoid_constraint(&joint.name, joint.default_pose.rotation).map(|c| (index, c))
        })
        .collect()
}

/// Default relative poses with every constrained joint at its limit center.
///
/// The arms' centers form a T-pose, so they are lowered toward the sides.
pub fn limit_center_poses(skeleton: &Skeleton, constraints: &ConstraintMap) -> Vec<Pose> {
    let mut poses: Vec<Pose> = (0..skeleton.joint_count())
        .map(|index| {
            let mut pose = skeleton.relative_default_pose(index);
            if let Some(constraint) = constraints.get(&index) {
                pose.rotation = constraint.compute_center_rotation();
            }
            pose
        })
        .collect();

    let lowering = Quat::from_rotation_x(UPPER_ARM_LOWERING);
    for name in ["LeftArm", "RightArm"] {
        if let Some(index) = skeleton.find_joint(name) {
            poses[index].rotation = (poses[index].rotation * lowering).normalize();
        }
    }
    poses
}
