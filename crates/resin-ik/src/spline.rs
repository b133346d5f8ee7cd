//! Spline solver for long chains driven from the hips (spine, neck, head).
//!
//! A Hermite curve is fitted from the hips to the target. Each joint keeps
//! its arc-length ratio along the curve and its offset from the ideal curve
//! frame, both measured once on the default pose.

use crate::ccd::{ChainContext, MAX_CHAIN_DEPTH};
use crate::chain::JointChainInfo;
use crate::math::{frame_from_y_and_x, lerp_unaligned};
use crate::pose::Pose;
use crate::skeleton::Skeleton;
use crate::target::IkTarget;
use glam::{Quat, Vec3};
use rhizome_resin_spline::{ArcLengthHermite, CubicHermite};
use std::collections::HashMap;

/// Hips tangent gain for head targets; bends concentrate near the head.
const HEAD_SPLINE_BASE_GAIN: f32 = 0.5;

/// Bone translations shorter than this collapse to zero.
const MIN_BONE_LENGTH: f32 = 1.0e-4;

/// Cached placement of one joint along a target's default-pose spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineJointInfo {
    /// Joint index.
    pub joint: usize,
    /// Fraction of the hips-to-tip distance at which the joint sits.
    pub ratio: f32,
    /// Default absolute pose relative to the spline frame at `ratio`.
    pub offset_pose: Pose,
}

/// Per-target spline infos keyed by tip joint, tip first.
pub(crate) type SplineCache = HashMap<usize, Vec<SplineJointInfo>>;

fn spline_between(base: Pose, tip: Pose, base_gain: f32, tip_gain: f32) -> ArcLengthHermite {
    let distance = (tip.translation - base.translation).length();
    ArcLengthHermite::new(CubicHermite::new(
        base.translation,
        base.rotation * Vec3::Y * (base_gain * distance),
        tip.translation,
        tip.rotation * Vec3::Y * (tip_gain * distance),
    ))
}

fn gains(tip: usize, head: Option<usize>) -> (f32, f32) {
    if head == Some(tip) {
        (HEAD_SPLINE_BASE_GAIN, 1.0)
    } else {
        (1.0, 1.0)
    }
}

fn frame_at(spline: &ArcLengthHermite, t: f32, x_hint: Vec3) -> Quat {
    frame_from_y_and_x(spline.derivative(t), x_hint)
}

/// Measures every joint from `tip` down to `hips` on the default pose.
///
/// Returns `None` when `tip` is not below `hips` or the default chain has
/// no length.
pub fn compute_spline_joint_infos(
    skeleton: &Skeleton,
    tip: usize,
    hips: usize,
    head: Option<usize>,
) -> Option<Vec<SplineJointInfo>> {
    if !skeleton.is_ancestor(hips, tip) {
        return None;
    }

    let tip_pose = skeleton.absolute_default_pose(tip);
    let base_pose = skeleton.absolute_default_pose(hips);
    let (base_gain, tip_gain) = gains(tip, head);
    let spline = spline_between(base_pose, tip_pose, base_gain, tip_gain);
    let total_length = spline.total_length();

    let base_to_tip = tip_pose.translation - base_pose.translation;
    let base_to_tip_length = base_to_tip.length();
    if base_to_tip_length <= MIN_BONE_LENGTH {
        return None;
    }
    let normal = base_to_tip / base_to_tip_length;

    let mut infos = Vec::new();
    let mut index = tip;
    loop {
        let default_pose = skeleton.absolute_default_pose(index);
        let ratio = (default_pose.translation - base_pose.translation).dot(normal) / base_to_tip_length;
        let t = spline.arc_length_inverse(ratio * total_length);

        let rotation = frame_at(&spline, t, default_pose.rotation * Vec3::X);
        let frame = Pose::new(spline.evaluate(t), rotation);
        infos.push(SplineJointInfo {
            joint: index,
            ratio,
            offset_pose: frame.inverse().then(&default_pose),
        });

        if index == hips || infos.len() >= MAX_CHAIN_DEPTH {
            break;
        }
        index = skeleton.parent(index)?;
    }
    Some(infos)
}

/// Runs one spline pass for `target` using its cached joint infos.
pub(crate) fn solve_target(
    ctx: &ChainContext<'_>,
    target: &IkTarget,
    infos: &[SplineJointInfo],
) -> Vec<JointChainInfo> {
    let Some(hips) = ctx.hips_index else {
        return Vec::new();
    };
    if infos.is_empty() {
        return Vec::new();
    }

    let absolute = ctx.absolute_poses;
    let mut tip_pose = target.pose();
    let base_pose = absolute[hips];
    let is_head = ctx.head_index == Some(target.index);
    let (base_gain, tip_gain) = gains(target.index, ctx.head_index);
    let spline = spline_between(base_pose, tip_pose, base_gain, tip_gain);
    let total_length = spline.total_length();

    // Keeps the twist from going the short way round when the head arches
    // far backwards.
    let half = lerp_unaligned(base_pose.rotation, tip_pose.rotation, 0.5);
    if (half * Vec3::Z).dot(base_pose.rotation * Vec3::Z) < 0.0 {
        tip_pose.rotation = -tip_pose.rotation;
    }

    let mut parent_absolute = ctx
        .skeleton
        .parent(hips)
        .map(|p| absolute[p])
        .unwrap_or(Pose::IDENTITY);

    let mut chain = Vec::with_capacity(infos.len());
    for (depth, info) in infos.iter().enumerate().rev() {
        let t = spline.arc_length_inverse(info.ratio * total_length);
        let twist_t = if is_head { t * t } else { t };
        let twist = lerp_unaligned(base_pose.rotation, tip_pose.rotation, twist_t);

        let rotation = frame_at(&spline, t, twist * Vec3::X);
        let desired = Pose::new(spline.evaluate(t), rotation).then(&info.offset_pose);
        let flexed = absolute[info.joint].blend(&desired, target.flex_coefficient(depth));
        let mut relative = parent_absolute.inverse().then(&flexed);

        let mut constrained = false;
        if info.joint != hips {
            // Limit how far the spine may stretch or compress.
            let length = relative.translation.length();
            if length > MIN_BONE_LENGTH {
                let default_length = ctx
                    .skeleton
                    .relative_default_pose(info.joint)
                    .translation
                    .length();
                let fraction = ctx.config.stretch_compress_fraction;
                let max_length = default_length * (1.0 + fraction);
                let min_length = default_length * (1.0 - fraction);
                if length > max_length {
                    relative.translation *= max_length / length;
                    constrained = true;
                } else if length < min_length {
                    relative.translation *= min_length / length;
                    constrained = true;
                }
            } else {
                relative.translation = Vec3::ZERO;
            }

            if let Some(constraint) = ctx.constraint(info.joint) {
                constrained |= constraint.apply(&mut relative.rotation);
            }
        }

        chain.push(JointChainInfo {
            rotation: relative.rotation,
            translation: relative.translation,
            weight: target.weight,
            joint: info.joint,
            constrained,
        });
        // Children follow the clamped pose, not the ideal one.
        parent_absolute = parent_absolute.then(&relative);
    }
    chain.reverse();
    chain
}
