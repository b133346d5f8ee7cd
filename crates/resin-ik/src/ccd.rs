//! Cyclic coordinate descent over a joint chain.
//!
//! A pass starts at the target's joint, aligns it toward the target
//! rotation, then walks toward the hips swinging each pivot so the tip
//! moves toward the target position. Every touched joint's proposed
//! relative pose is returned as a [`JointChainInfo`]; the relaxation loop
//! folds them into the accumulators.

use crate::chain::JointChainInfo;
use crate::config::IkConfig;
use crate::constraint::{ConstraintMap, RotationConstraint};
use crate::math::{MIN_AXIS_LENGTH, ease_out_expo, reject, scale_rotation, swing_twist_decomposition};
use crate::pose::Pose;
use crate::skeleton::Skeleton;
use crate::target::{IkTarget, IkTargetType};
use glam::{Quat, Vec3};

/// Longest chain a single pass will walk.
pub const MAX_CHAIN_DEPTH: usize = 30;

/// Swings smaller than this are skipped.
const MIN_ADJUSTMENT_ANGLE: f32 = 1.0e-4;

/// Pole corrections smaller than this (0.1 degree) are skipped.
const MIN_POLE_ADJUSTMENT_ANGLE: f32 = 0.001745;

/// Reference vectors projecting shorter than this fall back to the mid joint.
const MIN_POLE_PROJECTION_LENGTH: f32 = 0.5;

/// Read-only view of the solver state a single target pass needs.
#[derive(Clone, Copy)]
pub(crate) struct ChainContext<'a> {
    pub skeleton: &'a Skeleton,
    pub constraints: &'a ConstraintMap,
    pub relative_poses: &'a [Pose],
    pub absolute_poses: &'a [Pose],
    pub hips_index: Option<usize>,
    pub head_index: Option<usize>,
    pub has_hips_target: bool,
    pub config: &'a IkConfig,
}

impl ChainContext<'_> {
    pub(crate) fn constraint(&self, joint: usize) -> Option<&dyn RotationConstraint> {
        self.constraints.get(&joint).map(|c| c.as_ref())
    }

    fn is_hips(&self, joint: usize) -> bool {
        self.hips_index == Some(joint)
    }
}

/// Runs one CCD pass for `target`.
///
/// Returns an empty chain for rotation-only targets (handled after the
/// loop) and for targets without a pivot below the hips.
pub(crate) fn solve_target(ctx: &ChainContext<'_>, target: &IkTarget) -> Vec<JointChainInfo> {
    let mut chain = Vec::new();
    if target.target_type == IkTargetType::RotationOnly {
        return chain;
    }

    let tip = target.index;
    let Some(mut pivot) = ctx.skeleton.parent(tip) else {
        return chain;
    };
    if ctx.is_hips(pivot) {
        return chain;
    }
    let Some(mut pivot_parent) = ctx.skeleton.parent(pivot) else {
        return chain;
    };

    let absolute = ctx.absolute_poses;
    let mut tip_orientation = absolute[tip].rotation;
    let mut tip_parent_orientation = absolute[pivot].rotation;

    // Without this the head stays rigid and the spine thrusts as it nods.
    if target.target_type.has_position() {
        let delta = scale_rotation(
            target.rotation * tip_orientation.inverse(),
            target.flex_coefficient(0),
        );
        let mut tip_relative =
            (tip_parent_orientation.inverse() * delta * tip_orientation).normalize();

        let mut constrained = false;
        if let Some(constraint) = ctx.constraint(tip) {
            constrained = constraint.apply(&mut tip_relative);
            if constrained {
                tip_orientation = tip_parent_orientation * tip_relative;
            }
        }

        chain.push(JointChainInfo {
            rotation: tip_relative,
            translation: ctx.relative_poses[tip].translation,
            weight: target.weight,
            joint: tip,
            constrained,
        });
    }

    let mut tip_position = absolute[tip].translation;
    let mut depth = 1;

    loop {
        if depth >= MAX_CHAIN_DEPTH {
            break;
        }

        let joint_position = absolute[pivot].translation;
        let mut lever_arm = tip_position - joint_position;
        let mut delta = Quat::IDENTITY;

        match target.target_type {
            IkTargetType::RotationAndPosition | IkTargetType::HipsRelativeRotationAndPosition => {
                let mut target_line = target.translation - joint_position;

                // Lower spine only twists unless the hips are driven directly,
                // so hand and foot targets can't fold the torso.
                let lower_spine = ctx
                    .constraint(pivot)
                    .is_some_and(|c| c.is_lower_spine());
                if !ctx.has_hips_target && lower_spine && ctx.head_index != Some(tip) {
                    let twist_axis = joint_position - absolute[pivot_parent].translation;
                    let length = twist_axis.length();
                    if length > MIN_AXIS_LENGTH {
                        let twist_axis = twist_axis / length;
                        lever_arm = reject(lever_arm, twist_axis);
                        target_line = reject(target_line, twist_axis);
                    } else {
                        lever_arm = Vec3::ZERO;
                        target_line = Vec3::ZERO;
                    }
                }

                let axis = lever_arm.cross(target_line);
                let axis_length = axis.length();
                if axis_length > MIN_AXIS_LENGTH {
                    let axis = axis / axis_length;
                    let cos_angle = (lever_arm.dot(target_line)
                        / (lever_arm.length() * target_line.length()))
                    .clamp(-1.0, 1.0);
                    let angle = cos_angle.acos();
                    if angle > MIN_ADJUSTMENT_ANGLE {
                        delta = Quat::from_axis_angle(axis, angle * target.flex_coefficient(depth));
                        delta = leak_missing_twist(ctx, target, delta, tip_parent_orientation, lever_arm);
                    }
                }
            }
            IkTargetType::HmdHead => {
                // Slave the head's orientation by spreading the rotation
                // up the chain; its position is met by moving the hips.
                delta = scale_rotation(
                    target.rotation * tip_orientation.inverse(),
                    ctx.config.hmd_angle_distribution,
                );
            }
            _ => {}
        }

        // Q' = dQ * Q  and  Q = Qp * q  -->  q' = Qp^ * dQ * Q
        let parent_rotation = absolute[pivot_parent].rotation;
        let mut new_rotation =
            (parent_rotation.inverse() * delta * absolute[pivot].rotation).normalize();

        let mut constrained = false;
        if let Some(constraint) = ctx.constraint(pivot) {
            constrained = constraint.apply(&mut new_rotation);
            if constrained {
                // dQ = Qp * q' * Q^
                delta = parent_rotation * new_rotation * absolute[pivot].rotation.inverse();
            }
        }

        chain.push(JointChainInfo {
            rotation: new_rotation,
            translation: ctx.relative_poses[pivot].translation,
            weight: target.weight,
            joint: pivot,
            constrained,
        });

        tip_position = joint_position + delta * (tip_position - joint_position);
        tip_orientation = (delta * tip_orientation).normalize();
        tip_parent_orientation = (delta * tip_parent_orientation).normalize();

        pivot = pivot_parent;
        depth += 1;
        if ctx.is_hips(pivot) {
            break;
        }
        match ctx.skeleton.parent(pivot) {
            Some(parent) => pivot_parent = parent,
            None => break,
        }
    }

    if target.pole_vector_enabled {
        apply_pole_vector(ctx, target, &mut chain);
    }
    chain
}

/// If the tip can't reach its target rotation after `delta`, pre-twists
/// the pivot by a fraction of the missing twist about the lever arm.
fn leak_missing_twist(
    ctx: &ChainContext<'_>,
    target: &IkTarget,
    delta: Quat,
    tip_parent_orientation: Quat,
    lever_arm: Vec3,
) -> Quat {
    let Some(constraint) = ctx.constraint(target.index) else {
        return delta;
    };

    let mut tip_relative = (delta * tip_parent_orientation).inverse() * target.rotation;
    if !constraint.apply(&mut tip_relative) {
        return delta;
    }

    let constrained_tip = delta * tip_parent_orientation * tip_relative;
    let missing = target.rotation * constrained_tip.inverse();
    let Some(axis) = (delta * lever_arm).try_normalize() else {
        return delta;
    };
    let (_, twist) = swing_twist_decomposition(missing, axis);
    let twist = if twist.w < 0.0 { -twist } else { twist };
    (scale_rotation(twist, ctx.config.limit_leak_fraction) * delta).normalize()
}

/// Rotates the base and top of a two-bone limb about the base-to-top line
/// so the mid joint bends toward the target's pole vector.
fn apply_pole_vector(ctx: &ChainContext<'_>, target: &IkTarget, chain: &mut [JointChainInfo]) {
    let top = target.index;
    let Some(mid) = ctx.skeleton.parent(top) else {
        return;
    };
    let Some(base) = ctx.skeleton.parent(mid) else {
        return;
    };
    let base_parent = ctx.skeleton.parent(base);
    let Some(deepest) = chain.last() else {
        return;
    };

    let mut accum = ctx
        .skeleton
        .parent(deepest.joint)
        .map(|p| ctx.absolute_poses[p])
        .unwrap_or(Pose::IDENTITY);
    let mut base_parent_pose = accum;
    let (mut top_pose, mut mid_pose, mut base_pose) = (None, None, None);
    let (mut top_slot, mut base_slot) = (None, None);

    for (slot, info) in chain.iter().enumerate().rev() {
        accum = accum.then(&Pose::new(info.translation, info.rotation));
        if info.joint == top {
            top_slot = Some(slot);
            top_pose = Some(accum);
        }
        if info.joint == mid {
            mid_pose = Some(accum);
        }
        if info.joint == base {
            base_slot = Some(slot);
            base_pose = Some(accum);
        }
        if Some(info.joint) == base_parent {
            base_parent_pose = accum;
        }
    }

    let (Some(top_slot), Some(base_slot), Some(top_pose), Some(mid_pose), Some(base_pose)) =
        (top_slot, base_slot, top_pose, mid_pose, base_pose)
    else {
        return;
    };

    let pole_rotation = pole_rotation(target, top_pose, mid_pose, base_pose);

    if pole_rotation == Quat::IDENTITY {
        return;
    }

    let mut base_rotation =
        (base_parent_pose.rotation.inverse() * pole_rotation * base_pose.rotation).normalize();
    if let Some(constraint) = ctx.constraint(base) {
        chain[base_slot].constrained |= constraint.apply(&mut base_rotation);
    }
    chain[base_slot].rotation = base_rotation;

    // The top counter-rotates by whatever the base actually turned.
    let applied = (base_parent_pose.rotation * base_rotation * base_pose.rotation.inverse()).normalize();
    let mut top_rotation =
        (mid_pose.rotation.inverse() * applied.inverse() * top_pose.rotation).normalize();
    if let Some(constraint) = ctx.constraint(top) {
        chain[top_slot].constrained |= constraint.apply(&mut top_rotation);
    }
    chain[top_slot].rotation = top_rotation;
}

fn pole_rotation(target: &IkTarget, top: Pose, mid: Pose, base: Pose) -> Quat {
    let d = base.translation - top.translation;
    let d_length = d.length();
    if d_length <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    let d_unit = d / d_length;

    let mut e_proj = reject(mid.transform_vector(target.pole_reference_vector), d_unit);
    if e_proj.length() < MIN_POLE_PROJECTION_LENGTH {
        let mid_point = top.translation + d * 0.5;
        e_proj = reject(mid.translation - mid_point, d_unit);
    }
    let p_proj = reject(target.pole_vector, d_unit);

    let e_length = e_proj.length();
    let p_length = p_proj.length();
    if e_length <= f32::EPSILON || p_length <= f32::EPSILON {
        return Quat::IDENTITY;
    }

    // Back off as the pole vector approaches the limb axis.
    let magnitude = ease_out_expo(p_length);
    let dot = (e_proj / e_length).dot(p_proj / p_length).clamp(0.0, 1.0);
    let theta = dot.acos();
    if theta <= MIN_POLE_ADJUSTMENT_ANGLE {
        return Quat::IDENTITY;
    }
    let axis = if e_proj.cross(p_proj).dot(d_unit) < 0.0 {
        -d_unit
    } else {
        d_unit
    };
    Quat::from_axis_angle(axis, magnitude * theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elbow::ElbowConstraint;
    use crate::math::signed_twist_angle;
    use crate::skeleton::Joint;
    use crate::swing_twist::SwingTwistConstraint;

    fn arm() -> Skeleton {
        let up = Pose::from_translation(Vec3::Y);
        Skeleton::new(vec![
            Joint::new("root", Pose::IDENTITY),
            Joint::new("shoulder", up).with_parent(0),
            Joint::new("elbow", up).with_parent(1),
            Joint::new("hand", up).with_parent(2),
        ])
        .unwrap()
    }

    struct Fixture {
        skeleton: Skeleton,
        constraints: ConstraintMap,
        relative: Vec<Pose>,
        absolute: Vec<Pose>,
        config: IkConfig,
    }

    impl Fixture {
        fn new(skeleton: Skeleton) -> Self {
            let relative = skeleton.relative_default_poses();
            let absolute = skeleton.compute_absolute_poses(&relative);
            Self {
                skeleton,
                constraints: ConstraintMap::new(),
                relative,
                absolute,
                config: IkConfig::default(),
            }
        }

        fn ctx(&self) -> ChainContext<'_> {
            ChainContext {
                skeleton: &self.skeleton,
                constraints: &self.constraints,
                relative_poses: &self.relative,
                absolute_poses: &self.absolute,
                hips_index: None,
                head_index: None,
                has_hips_target: false,
                config: &self.config,
            }
        }
    }

    fn position_target(index: usize, translation: Vec3) -> IkTarget {
        IkTarget::new(
            IkTargetType::RotationAndPosition,
            index,
            Pose::new(translation, Quat::IDENTITY),
        )
    }

    #[test]
    fn test_chain_walks_to_child_of_root() {
        let fixture = Fixture::new(arm());
        let chain = solve_target(&fixture.ctx(), &position_target(3, Vec3::new(1.0, 2.0, 0.0)));

        let joints: Vec<usize> = chain.iter().map(|c| c.joint).collect();
        assert_eq!(joints, vec![3, 2, 1]);
        assert!(chain.iter().all(|c| c.weight == 1.0 && !c.constrained));
    }

    #[test]
    fn test_skips_short_chains() {
        let fixture = Fixture::new(arm());
        // The shoulder's parent is the root: nothing to pivot.
        let chain = solve_target(&fixture.ctx(), &position_target(1, Vec3::X));
        assert!(chain.is_empty());

        let rotation_only = IkTarget::new(IkTargetType::RotationOnly, 3, Pose::IDENTITY);
        assert!(solve_target(&fixture.ctx(), &rotation_only).is_empty());
    }

    #[test]
    fn test_first_pivot_aims_tip_at_target() {
        let fixture = Fixture::new(arm());
        let target_position = Vec3::new(1.0, 2.0, 0.0);
        let chain = solve_target(&fixture.ctx(), &position_target(3, target_position));

        // The elbow's proposal alone swings the hand onto the elbow-target line.
        let mut relative = fixture.relative.clone();
        relative[2].rotation = chain[1].rotation;
        let absolute = fixture.skeleton.compute_absolute_poses(&relative);
        let to_tip = (absolute[3].translation - absolute[2].translation).normalize();
        let to_target = (target_position - absolute[2].translation).normalize();
        assert!(to_tip.dot(to_target) > 0.9999);
    }

    #[test]
    fn test_pivot_constraint_reported() {
        let mut fixture = Fixture::new(arm());
        fixture.constraints.insert(
            2,
            Box::new(ElbowConstraint::new(Quat::IDENTITY, Vec3::Z).with_angle_limits(0.0, 0.2)),
        );
        let chain = solve_target(&fixture.ctx(), &position_target(3, Vec3::new(-1.0, 2.0, 0.0)));

        let elbow = chain.iter().find(|c| c.joint == 2).unwrap();
        assert!(elbow.constrained);
        let angle = 2.0 * elbow.rotation.w.abs().min(1.0).acos();
        assert!((angle - 0.2).abs() < 1.0e-3);
    }

    #[test]
    fn test_lower_spine_only_twists() {
        let mut fixture = Fixture::new(arm());
        fixture.constraints.insert(
            2,
            Box::new(SwingTwistConstraint::new(Quat::IDENTITY).with_lower_spine(true)),
        );
        let chain = solve_target(&fixture.ctx(), &position_target(3, Vec3::new(1.0, 2.0, 0.5)));

        // The spine joint's bone axis (Y) is unchanged by its proposal.
        let spine = chain.iter().find(|c| c.joint == 2).unwrap();
        assert!((spine.rotation * Vec3::Y - Vec3::Y).length() < 1.0e-4);
    }

    #[test]
    fn test_flex_coefficient_limits_swing() {
        let fixture = Fixture::new(arm());
        let mut target = position_target(3, Vec3::new(1.0, 2.0, 0.0));
        target.flex_coefficients = vec![1.0, 0.5];
        let chain = solve_target(&fixture.ctx(), &target);

        // Elbow to target is 90 degrees off the bone; half of that is applied.
        let angle = 2.0 * chain[1].rotation.w.abs().min(1.0).acos();
        assert!((angle - std::f32::consts::FRAC_PI_4).abs() < 1.0e-3);
    }

    #[test]
    fn test_hmd_head_distributes_rotation() {
        let fixture = Fixture::new(arm());
        let turn = Quat::from_rotation_y(1.0);
        let target = IkTarget::new(IkTargetType::HmdHead, 3, Pose::new(Vec3::new(0.0, 3.0, 0.0), turn));
        let chain = solve_target(&fixture.ctx(), &target);

        let elbow = chain.iter().find(|c| c.joint == 2).unwrap();
        let expected = Quat::from_rotation_y(1.0 * fixture.config.hmd_angle_distribution);
        assert!(elbow.rotation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_pole_vector_bends_mid_joint() {
        // Bent arm in the XY plane: the elbow points toward -X.
        let skeleton = Skeleton::new(vec![
            Joint::new("root", Pose::IDENTITY),
            Joint::new("shoulder", Pose::from_translation(Vec3::Y)).with_parent(0),
            Joint::new("elbow", Pose::new(Vec3::Y, Quat::from_rotation_z(-0.5))).with_parent(1),
            Joint::new("hand", Pose::new(Vec3::Y, Quat::from_rotation_z(1.0))).with_parent(2),
        ])
        .unwrap();
        let fixture = Fixture::new(skeleton);
        let hand = fixture.absolute[3];
        let mut target = IkTarget::new(IkTargetType::RotationAndPosition, 3, hand);
        target.pole_vector_enabled = true;
        target.pole_vector = Vec3::Z;
        target.pole_reference_vector = Vec3::new(0.0, 0.0, 0.1);

        let chain = solve_target(&fixture.ctx(), &target);
        let mut relative = fixture.relative.clone();
        for info in &chain {
            relative[info.joint].rotation = info.rotation;
        }
        let absolute = fixture.skeleton.compute_absolute_poses(&relative);

        // The elbow has swung out of the XY plane toward +Z.
        assert!(absolute[2].translation.z > fixture.absolute[2].translation.z + 0.1);
        // The hand keeps its orientation.
        assert!(absolute[3].rotation.dot(hand.rotation).abs() > 0.999);
    }

    #[test]
    fn test_pole_vector_respects_base_limits() {
        let mut fixture = Fixture::new(arm());
        fixture.constraints.insert(
            1,
            Box::new(
                SwingTwistConstraint::new(Quat::IDENTITY)
                    .with_twist_limits(-0.1, 0.1)
                    .with_cone(std::f32::consts::FRAC_PI_4),
            ),
        );

        for pole in [Vec3::Z, Vec3::NEG_X, Vec3::X, Vec3::NEG_Z] {
            let mut target = position_target(3, Vec3::new(0.5, 1.5, 0.5));
            target.pole_vector_enabled = true;
            target.pole_vector = pole;
            let chain = solve_target(&fixture.ctx(), &target);

            let shoulder = chain.iter().find(|c| c.joint == 1).unwrap();
            let (swing, twist) = swing_twist_decomposition(shoulder.rotation, Vec3::Y);
            let swing_angle = (swing * Vec3::Y).dot(Vec3::Y).clamp(-1.0, 1.0).acos();
            let twist_angle = signed_twist_angle(twist, Vec3::Y, Vec3::X);
            assert!(swing_angle <= std::f32::consts::FRAC_PI_4 + 1.0e-3, "swing {swing_angle} for {pole}");
            assert!(twist_angle.abs() <= 0.1 + 1.0e-3, "twist {twist_angle} for {pole}");
        }
    }

    fn twist_limited_hand() -> Fixture {
        let mut fixture = Fixture::new(arm());
        fixture.constraints.insert(
            3,
            Box::new(SwingTwistConstraint::new(Quat::IDENTITY).with_twist_limits(-0.1, 0.1)),
        );
        fixture
    }

    #[test]
    fn test_unreachable_tip_twist_leaks_into_pivot() {
        let mut fixture = twist_limited_hand();
        // The elbow swings the hand onto +X; the target then asks for a
        // full radian of twist about the bone, well past the hand's limit.
        let swing = Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2);
        let target = IkTarget::new(
            IkTargetType::RotationAndPosition,
            3,
            Pose::new(Vec3::new(1.0, 2.0, 0.0), swing * Quat::from_rotation_y(1.0)),
        );

        fixture.config.limit_leak_fraction = 0.0;
        let chain = solve_target(&fixture.ctx(), &target);
        assert!(chain[0].constrained);
        assert!(chain[1].rotation.dot(swing).abs() > 0.9999);

        // 0.9 rad is missing after the clamp; a tenth of it lands on the
        // elbow, about the swung lever arm (+X).
        fixture.config.limit_leak_fraction = 0.1;
        let chain = solve_target(&fixture.ctx(), &target);
        let expected = scale_rotation(Quat::from_rotation_x(0.9), 0.1) * swing;
        assert!(chain[1].rotation.dot(expected).abs() > 0.9999);
        assert!(chain[1].rotation.dot(swing).abs() < 0.9995);
    }

    #[test]
    fn test_reachable_tip_twist_does_not_leak() {
        let fixture = twist_limited_hand();
        let swing = Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2);
        let target = IkTarget::new(
            IkTargetType::RotationAndPosition,
            3,
            Pose::new(Vec3::new(1.0, 2.0, 0.0), swing * Quat::from_rotation_y(0.05)),
        );

        let chain = solve_target(&fixture.ctx(), &target);
        assert!(!chain[0].constrained);
        assert!(chain[1].rotation.dot(swing).abs() > 0.9999);
    }
}
