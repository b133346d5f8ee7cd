//! The IK overlay: binds targets, relaxes, solves and moves the hips.

use crate::accumulator::{RotationAccumulator, TranslationAccumulator};
use crate::ccd::{self, ChainContext};
use crate::chain::{JointChainInfo, SolveStats, accumulate};
use crate::config::{IkConfig, SolutionSource};
use crate::constraint::{ConstraintMap, RotationConstraint};
use crate::humanoid::{LIMBS, humanoid_constraints, limit_center_poses};
use crate::math::MIN_AXIS_LENGTH;
use crate::pose::Pose;
use crate::skeleton::Skeleton;
use crate::spline::{self, SplineCache, compute_spline_joint_infos};
use crate::target::{IkTarget, IkTargetType, IkTargetVar};
use crate::variables::{AnimContext, AnimVariables};
use glam::{Quat, Vec3};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Constraint-based IK solver applied on top of an animation pose.
///
/// Each call to [`overlay`](Self::overlay) relaxes the previous solution
/// toward a [`SolutionSource`], resolves targets from animation variables,
/// iterates CCD and spline passes until the targets are met or the
/// iteration cap is hit, and updates the hips offset for the next frame.
#[derive(Debug, Default)]
pub struct InverseKinematics {
    config: IkConfig,
    skeleton: Option<Arc<Skeleton>>,
    constraints: ConstraintMap,
    limit_center_poses: Vec<Pose>,
    relative_poses: Vec<Pose>,
    rotation_accumulators: Vec<RotationAccumulator>,
    translation_accumulators: Vec<TranslationAccumulator>,
    target_vars: Vec<IkTargetVar>,
    spline_cache: SplineCache,
    hips_offset: Vec3,
    hips_index: Option<usize>,
    hips_parent_index: Option<usize>,
    head_index: Option<usize>,
    /// `(tip, base)` joint pairs of limbs present in the skeleton.
    limbs: Vec<(usize, usize)>,
    max_target_index: Option<usize>,
    /// Position of the hips target in this frame's target list.
    hips_target_index: Option<usize>,
    last_stats: SolveStats,
    last_chains: Vec<JointChainInfo>,
    debug_chains: Option<Vec<JointChainInfo>>,
}

impl InverseKinematics {
    /// Creates an unbound solver.
    pub fn new(config: IkConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// The solver's configuration.
    pub fn config(&self) -> &IkConfig {
        &self.config
    }

    /// The bound skeleton.
    pub fn skeleton(&self) -> Option<&Arc<Skeleton>> {
        self.skeleton.as_ref()
    }

    /// Binds a skeleton.
    ///
    /// Rebuilds humanoid constraints and limit-center poses, drops cached
    /// spline data and forces every target binding to resolve again. The
    /// next overlay starts from its under pose.
    pub fn set_skeleton(&mut self, skeleton: Arc<Skeleton>) {
        for var in &mut self.target_vars {
            var.joint_index = None;
        }
        self.max_target_index = None;
        self.hips_target_index = None;

        self.constraints = humanoid_constraints(&skeleton);
        self.limit_center_poses = limit_center_poses(&skeleton, &self.constraints);
        self.head_index = skeleton.find_joint("Head");
        self.hips_index = skeleton.find_joint("Hips");
        self.hips_parent_index = self.hips_index.and_then(|hips| skeleton.parent(hips));
        self.limbs = LIMBS
            .iter()
            .filter_map(|(tip, base)| {
                let tip = skeleton.find_joint(tip)?;
                let base = skeleton.find_joint(base)?;
                skeleton.is_ancestor(base, tip).then_some((tip, base))
            })
            .collect();

        let joint_count = skeleton.joint_count();
        self.spline_cache.clear();
        self.relative_poses.clear();
        self.rotation_accumulators = vec![RotationAccumulator::default(); joint_count];
        self.translation_accumulators = vec![TranslationAccumulator::default(); joint_count];
        self.hips_offset = Vec3::ZERO;
        self.last_stats = SolveStats::default();
        self.last_chains.clear();
        self.debug_chains = None;

        debug!(
            joints = joint_count,
            constraints = self.constraints.len(),
            hips = ?self.hips_index,
            head = ?self.head_index,
            limbs = self.limbs.len(),
            "IK skeleton bound"
        );
        self.skeleton = Some(skeleton);
    }

    /// Registers a target binding, replacing any binding for the same joint.
    pub fn set_target_var(&mut self, mut var: IkTargetVar) {
        var.joint_index = None;
        match self
            .target_vars
            .iter_mut()
            .find(|v| v.joint_name == var.joint_name)
        {
            Some(existing) => *existing = var,
            None => self.target_vars.push(var),
        }
    }

    /// Replaces every target binding.
    pub fn set_target_vars(&mut self, vars: impl IntoIterator<Item = IkTargetVar>) {
        self.target_vars.clear();
        for var in vars {
            self.set_target_var(var);
        }
    }

    /// Registered target bindings.
    pub fn target_vars(&self) -> &[IkTargetVar] {
        &self.target_vars
    }

    /// Number of registered target bindings.
    pub fn target_var_count(&self) -> usize {
        self.target_vars.len()
    }

    /// Installs or replaces the constraint on `joint`.
    ///
    /// Overrides last until the next [`set_skeleton`](Self::set_skeleton).
    pub fn set_constraint(&mut self, joint: usize, constraint: Box<dyn RotationConstraint>) {
        self.constraints.insert(joint, constraint);
        self.refresh_limit_centers();
    }

    /// Removes the constraint on `joint`, returning it.
    pub fn remove_constraint(&mut self, joint: usize) -> Option<Box<dyn RotationConstraint>> {
        let removed = self.constraints.remove(&joint);
        self.refresh_limit_centers();
        removed
    }

    /// The constraint on `joint`, if any.
    pub fn constraint(&self, joint: usize) -> Option<&dyn RotationConstraint> {
        self.constraints.get(&joint).map(|c| c.as_ref())
    }

    fn refresh_limit_centers(&mut self) {
        if let Some(skeleton) = &self.skeleton {
            self.limit_center_poses = limit_center_poses(skeleton, &self.constraints);
        }
    }

    /// Clamps the hips offset to `meters`, converted to skeleton units.
    pub fn set_max_hips_offset_length(&mut self, meters: f32) {
        self.config.max_hips_offset_length = meters * self.config.units_per_meter;
    }

    /// Restores every constraint's configured limits.
    pub fn clear_joint_limit_history(&mut self) {
        for constraint in self.constraints.values_mut() {
            constraint.clear_history();
        }
    }

    /// Current solution, relative to each joint's parent.
    pub fn relative_poses(&self) -> &[Pose] {
        &self.relative_poses
    }

    /// Default poses with constrained joints at their limit centers.
    pub fn limit_center_poses(&self) -> &[Pose] {
        &self.limit_center_poses
    }

    /// Hips displacement carried into the next frame.
    pub fn hips_offset(&self) -> Vec3 {
        self.hips_offset
    }

    /// Statistics of the last solve.
    pub fn last_stats(&self) -> SolveStats {
        self.last_stats
    }

    /// Chains proposed in the last iteration of the last solve.
    pub fn last_chains(&self) -> &[JointChainInfo] {
        &self.last_chains
    }

    /// Snapshot of the last chains, kept when the context asks for it.
    pub fn debug_chains(&self) -> Option<&[JointChainInfo]> {
        self.debug_chains.as_deref()
    }

    /// Whether the last solve moved `joint`.
    pub fn is_ik_affected(&self, joint: usize) -> bool {
        self.rotation_accumulators
            .get(joint)
            .is_some_and(|a| a.is_dirty())
    }

    /// Solves one frame on top of `under_poses` and returns the result.
    ///
    /// `dt` is clamped to the configured maximum. Poses that don't match
    /// the bound skeleton are passed through unchanged.
    pub fn overlay(
        &mut self,
        vars: &dyn AnimVariables,
        context: &AnimContext,
        dt: f32,
        under_poses: &[Pose],
    ) -> &[Pose] {
        let Some(skeleton) = self.skeleton.clone() else {
            warn!("IK overlay called without a skeleton, passing poses through");
            self.relative_poses = under_poses.to_vec();
            return &self.relative_poses;
        };
        if under_poses.len() != skeleton.joint_count() {
            warn!(
                expected = skeleton.joint_count(),
                actual = under_poses.len(),
                "IK under pose does not match skeleton, passing poses through"
            );
            self.relative_poses = under_poses.to_vec();
            return &self.relative_poses;
        }
        if under_poses.is_empty() {
            self.relative_poses.clear();
            return &self.relative_poses;
        }

        let source_value = vars.lookup_int(
            &self.config.solution_source_var,
            self.config.solution_source as i32,
        );
        let source = SolutionSource::from_i32(source_value).unwrap_or_default();
        let dt = dt.min(self.config.max_overlay_dt);

        if self.relative_poses.len() != under_poses.len() {
            self.relative_poses = under_poses.to_vec();
        } else {
            self.init_from_solution_source(source, under_poses);
        }

        // Widen limits the animation itself violates instead of clamping it.
        for (&index, constraint) in self.constraints.iter_mut() {
            if let Some(pose) = under_poses.get(index) {
                constraint.dynamically_adjust_limits(pose.rotation);
            }
        }

        let mut targets = self.compute_targets(&skeleton, vars, context, under_poses);
        if targets.is_empty() {
            self.relative_poses = under_poses.to_vec();
            for accumulator in &mut self.rotation_accumulators {
                accumulator.clear_and_clean();
            }
            for accumulator in &mut self.translation_accumulators {
                accumulator.clear_and_clean();
            }
            self.last_stats = SolveStats::default();
            self.last_chains.clear();
            self.debug_chains = None;
            return &self.relative_poses;
        }

        self.shift_hips(&skeleton, &mut targets, under_poses);
        self.precondition_limbs(&skeleton, &targets);
        self.solve(&skeleton, &targets, context);

        if self.hips_target_index.is_none() {
            self.compute_hips_offset(&skeleton, &targets, under_poses, dt);
        } else {
            self.hips_offset = Vec3::ZERO;
        }
        &self.relative_poses
    }

    fn init_from_solution_source(&mut self, source: SolutionSource, under_poses: &[Pose]) {
        let factor = self.config.relax_blend_factor;
        match source {
            SolutionSource::RelaxToUnderPoses => blend_to_poses(
                &mut self.relative_poses,
                &self.rotation_accumulators,
                under_poses,
                under_poses,
                factor,
            ),
            SolutionSource::RelaxToLimitCenterPoses => {
                blend_to_poses(
                    &mut self.relative_poses,
                    &self.rotation_accumulators,
                    &self.limit_center_poses,
                    under_poses,
                    factor,
                );
                // The hips follow the limit-center pose whether or not IK moved them.
                if let Some(hips) = self.hips_index {
                    if let (Some(pose), Some(relative)) = (
                        self.limit_center_poses.get(hips),
                        self.relative_poses.get_mut(hips),
                    ) {
                        *relative = *pose;
                    }
                }
            }
            SolutionSource::PreviousSolution => {}
            SolutionSource::UnderPoses => self.relative_poses = under_poses.to_vec(),
            SolutionSource::LimitCenterPoses => {
                if self.limit_center_poses.len() == self.relative_poses.len() {
                    self.relative_poses.clone_from(&self.limit_center_poses);
                }
            }
        }
    }

    fn compute_targets(
        &mut self,
        skeleton: &Skeleton,
        vars: &dyn AnimVariables,
        context: &AnimContext,
        under_poses: &[Pose],
    ) -> Vec<IkTarget> {
        self.max_target_index = None;
        self.hips_target_index = None;
        let mut targets = Vec::new();
        let mut dropped = false;

        for var in &mut self.target_vars {
            let index = match var.joint_index {
                Some(index) => index,
                None => match skeleton.find_joint(&var.joint_name) {
                    Some(index) => {
                        var.joint_index = Some(index);
                        index
                    }
                    None => {
                        warn!(joint = %var.joint_name, "IK target joint not found in skeleton, dropping target");
                        dropped = true;
                        continue;
                    }
                },
            };

            let target_type = IkTargetType::from(
                vars.lookup_int(&var.type_var, IkTargetType::RotationAndPosition as i32),
            );
            if target_type == IkTargetType::Unknown {
                continue;
            }

            let default_pose = skeleton.absolute_pose(index, under_poses);
            let rotation = context.lookup_rotation(vars, &var.rotation_var, default_pose.rotation);
            let translation = context.lookup_point(vars, &var.position_var, default_pose.translation);

            let mut target = IkTarget::new(target_type, index, Pose::new(translation, rotation));
            target.weight = vars.lookup_float(&var.weight_var, var.weight);
            target.flex_coefficients.clone_from(&var.flex_coefficients);
            target.pole_vector_enabled = vars.lookup_bool(&var.pole_vector_enabled_var, false);
            target.pole_vector = context
                .lookup_direction(vars, &var.pole_vector_var, Vec3::Z)
                .try_normalize()
                .unwrap_or(Vec3::Z);
            target.pole_reference_vector = context
                .lookup_direction(vars, &var.pole_reference_vector_var, Vec3::Z)
                .try_normalize()
                .unwrap_or(Vec3::Z);

            targets.push(target);
            self.max_target_index = self.max_target_index.max(Some(index));
            if self.hips_index == Some(index) {
                self.hips_target_index = Some(targets.len() - 1);
            }
        }

        if dropped {
            self.target_vars.retain(|v| v.joint_index.is_some());
        }
        targets
    }

    /// Moves the hips to the hips target or by last frame's offset, and
    /// carries hips-relative targets along.
    fn shift_hips(&mut self, skeleton: &Skeleton, targets: &mut [IkTarget], under_poses: &[Pose]) {
        let Some(hips) = self.hips_index else {
            return;
        };

        if let Some(target) = self.hips_target_index.and_then(|i| targets.get(i)) {
            let absolute = target.pose();
            self.relative_poses[hips] = match skeleton.parent(target.index) {
                Some(parent) => skeleton
                    .absolute_pose(parent, &self.relative_poses)
                    .inverse()
                    .then(&absolute),
                None => absolute,
            };
        } else {
            let length = self.hips_offset.length();
            let dead_zone = self.config.min_hips_offset_length;
            if length > dead_zone {
                let offset = self.hips_offset * ((length - dead_zone) / length);
                match self.hips_parent_index {
                    None => self.relative_poses[hips].translation += offset,
                    Some(parent) => {
                        let mut absolute = skeleton.absolute_pose(hips, &self.relative_poses);
                        absolute.translation += offset;
                        self.relative_poses[hips] = skeleton
                            .absolute_pose(parent, &self.relative_poses)
                            .inverse()
                            .then(&absolute);
                    }
                }
            }
        }

        let shifted = skeleton.absolute_pose(hips, &self.relative_poses).translation;
        let under = skeleton.absolute_pose(hips, under_poses).translation;
        let displacement = shifted - under;
        for target in targets
            .iter_mut()
            .filter(|t| t.target_type == IkTargetType::HipsRelativeRotationAndPosition)
        {
            target.translation += displacement;
        }
    }

    /// Swings each limb's base so its tip lies on the line toward the
    /// target, which keeps CCD from locking the limb straight.
    fn precondition_limbs(&mut self, skeleton: &Skeleton, targets: &[IkTarget]) {
        for target in targets.iter().filter(|t| {
            matches!(
                t.target_type,
                IkTargetType::RotationAndPosition | IkTargetType::HipsRelativeRotationAndPosition
            )
        }) {
            for &(tip, base) in self.limbs.iter().filter(|(tip, _)| *tip == target.index) {
                let tip_pose = skeleton.absolute_pose(tip, &self.relative_poses);
                let base_pose = skeleton.absolute_pose(base, &self.relative_poses);
                let base_parent_rotation = skeleton
                    .parent(base)
                    .map(|p| skeleton.absolute_pose(p, &self.relative_poses).rotation)
                    .unwrap_or(Quat::IDENTITY);

                let target_line = target.translation - base_pose.translation;
                let lever_arm = tip_pose.translation - base_pose.translation;
                let axis = lever_arm.cross(target_line);
                let axis_length = axis.length();
                if axis_length > MIN_AXIS_LENGTH {
                    let cos_angle = (lever_arm.dot(target_line)
                        / (lever_arm.length() * target_line.length()))
                    .clamp(-1.0, 1.0);
                    let swing = Quat::from_axis_angle(axis / axis_length, cos_angle.acos());
                    self.relative_poses[base].rotation =
                        (base_parent_rotation.inverse() * swing * base_pose.rotation).normalize();
                }
            }
        }
    }

    fn solve(&mut self, skeleton: &Skeleton, targets: &[IkTarget], context: &AnimContext) {
        let mut absolute = skeleton.compute_absolute_poses(&self.relative_poses);
        for accumulator in &mut self.rotation_accumulators {
            accumulator.clear_and_clean();
        }
        for accumulator in &mut self.translation_accumulators {
            accumulator.clear_and_clean();
        }

        // Chains only touch the target joints and their ancestors, which
        // always have lower indices.
        let touched = self
            .max_target_index
            .map_or(0, |max| max + 1)
            .min(self.relative_poses.len());
        let has_hips_target = self.hips_target_index.is_some();

        let mut max_error = f32::MAX;
        let mut iterations = 0;
        let mut chains: Vec<JointChainInfo> = Vec::new();

        while max_error > self.config.error_tolerance && iterations < self.config.max_iterations {
            iterations += 1;
            chains.clear();

            for target in targets {
                let infos = match (target.target_type, self.hips_index) {
                    (IkTargetType::Spline, Some(hips)) => Some(
                        self.spline_cache
                            .entry(target.index)
                            .or_insert_with(|| {
                                compute_spline_joint_infos(skeleton, target.index, hips, self.head_index)
                                    .unwrap_or_default()
                            })
                            .as_slice(),
                    ),
                    _ => None,
                };

                let ctx = ChainContext {
                    skeleton,
                    constraints: &self.constraints,
                    relative_poses: &self.relative_poses,
                    absolute_poses: &absolute,
                    hips_index: self.hips_index,
                    head_index: self.head_index,
                    has_hips_target,
                    config: &self.config,
                };
                let chain = match (target.target_type, infos) {
                    (IkTargetType::Spline, Some(infos)) => spline::solve_target(&ctx, target, infos),
                    (IkTargetType::Spline, None) => Vec::new(),
                    _ => ccd::solve_target(&ctx, target),
                };

                accumulate(
                    &chain,
                    &mut self.rotation_accumulators,
                    &mut self.translation_accumulators,
                );
                chains.extend(chain);
            }

            for index in 0..touched {
                let rotation = &mut self.rotation_accumulators[index];
                if !rotation.is_empty() {
                    self.relative_poses[index].rotation = rotation.average();
                    rotation.clear();
                }
                let translation = &mut self.translation_accumulators[index];
                if !translation.is_empty() {
                    self.relative_poses[index].translation = translation.average();
                    translation.clear();
                }
            }

            absolute = skeleton.compute_absolute_poses(&self.relative_poses);
            max_error = targets
                .iter()
                .filter(|t| t.target_type.has_position())
                .map(|t| (absolute[t.index].translation - t.translation).length())
                .fold(0.0, f32::max);
        }

        // Rotation-only targets off every other chain get their exact rotation.
        for target in targets
            .iter()
            .filter(|t| t.target_type == IkTargetType::RotationOnly)
        {
            let tip = target.index;
            let Some(parent) = skeleton.parent(tip) else {
                continue;
            };
            if self.rotation_accumulators[tip].is_dirty() {
                continue;
            }
            let mut rotation = (absolute[parent].rotation.inverse() * target.rotation).normalize();
            if let Some(constraint) = self.constraints.get(&tip) {
                constraint.apply(&mut rotation);
            }
            self.relative_poses[tip].rotation = rotation;
        }

        self.last_stats = SolveStats {
            iterations,
            max_error,
            constrained_joints: chains.iter().filter(|c| c.constrained).count(),
        };
        trace!(iterations, max_error, targets = targets.len(), "IK solve finished");

        self.debug_chains = context.debug_ik_chains.then(|| chains.clone());
        self.last_chains = chains;
    }

    /// Measures how far the hips should move next frame so targets the
    /// chains couldn't reach come within range.
    fn compute_hips_offset(
        &mut self,
        skeleton: &Skeleton,
        targets: &[IkTarget],
        under_poses: &[Pose],
        dt: f32,
    ) {
        let config = &self.config;
        let mut new_offset = Vec3::ZERO;
        let mut limb_targets = 0;
        let mut hmd_driven = false;

        for target in targets {
            let actual = skeleton
                .absolute_pose(target.index, &self.relative_poses)
                .translation;
            if self.head_index == Some(target.index) {
                match target.target_type {
                    IkTargetType::RotationOnly => {
                        // Bring the under pose toward where the head ended up.
                        let under = skeleton.absolute_pose(target.index, under_poses).translation;
                        new_offset += config.head_offset_slave_factor * (actual - under);
                    }
                    IkTargetType::HmdHead => {
                        // The head position must be met exactly; nothing else counts.
                        self.hips_offset += target.translation - actual;
                        new_offset = self.hips_offset;
                        hmd_driven = true;
                        break;
                    }
                    IkTargetType::RotationAndPosition => {
                        new_offset += target.translation - actual;
                        new_offset *= config.hips_pressure_scale;
                    }
                    _ => {}
                }
            } else if target.target_type == IkTargetType::RotationAndPosition {
                new_offset += target.translation - actual;
                if self.limbs.iter().any(|(tip, _)| *tip == target.index) {
                    limb_targets += 1;
                }
            }
        }

        if !hmd_driven {
            new_offset.y -= config.hips_downward_bias * limb_targets as f32;
        }

        let tau = if dt < config.hips_offset_timescale {
            dt / config.hips_offset_timescale
        } else {
            1.0
        };
        self.hips_offset += (new_offset - self.hips_offset) * tau;

        let length = self.hips_offset.length();
        if length > config.max_hips_offset_length {
            self.hips_offset *= config.max_hips_offset_length / length;
        }
    }
}

/// Relaxes `relative` toward `source`.
///
/// Joints IK moved last frame rotate `factor` of the way toward the source,
/// every other joint snaps to the under pose. Translations always come
/// from the under pose.
fn blend_to_poses(
    relative: &mut [Pose],
    accumulators: &[RotationAccumulator],
    source: &[Pose],
    under: &[Pose],
    factor: f32,
) {
    for (index, pose) in relative.iter_mut().enumerate() {
        let (Some(source), Some(under)) = (source.get(index), under.get(index)) else {
            continue;
        };
        let dirty = accumulators.get(index).is_some_and(|a| a.is_dirty());
        pose.rotation = if dirty {
            pose.rotation.lerp(source.rotation, factor)
        } else {
            under.rotation
        };
        pose.translation = under.translation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elbow::ElbowConstraint;
    use crate::skeleton::Joint;
    use crate::variables::VariableMap;

    fn chain_skeleton() -> Arc<Skeleton> {
        let up = Pose::from_translation(Vec3::Y);
        Arc::new(
            Skeleton::new(vec![
                Joint::new("root", Pose::IDENTITY),
                Joint::new("upper", up).with_parent(0),
                Joint::new("lower", up).with_parent(1),
                Joint::new("tip", up).with_parent(2),
            ])
            .unwrap(),
        )
    }

    fn reach(position: Vec3) -> (InverseKinematics, VariableMap) {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(chain_skeleton());
        ik.set_target_var(IkTargetVar::new("tip").with_position_var("tipPosition"));
        let mut vars = VariableMap::new();
        vars.set_vec3("tipPosition", position);
        (ik, vars)
    }

    /// Hips with a head and one arm; relative poses start at the defaults.
    fn torso() -> (InverseKinematics, Arc<Skeleton>) {
        let at = |x: f32, y: f32| Pose::from_translation(Vec3::new(x, y, 0.0));
        let skeleton = Arc::new(
            Skeleton::new(vec![
                Joint::new("Hips", at(0.0, 100.0)),
                Joint::new("Head", at(0.0, 50.0)).with_parent(0),
                Joint::new("LeftArm", at(10.0, 40.0)).with_parent(0),
                Joint::new("LeftForeArm", at(0.0, 25.0)).with_parent(2),
                Joint::new("LeftHand", at(0.0, 25.0)).with_parent(3),
            ])
            .unwrap(),
        );
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(skeleton.clone());
        ik.relative_poses = skeleton.relative_default_poses();
        (ik, skeleton)
    }

    fn offset_target(
        skeleton: &Skeleton,
        target_type: IkTargetType,
        index: usize,
        offset: Vec3,
    ) -> IkTarget {
        let actual = skeleton.absolute_pose(index, &skeleton.relative_default_poses());
        IkTarget::new(target_type, index, Pose::new(actual.translation + offset, Quat::IDENTITY))
    }

    fn assert_vec_eq(actual: Vec3, expected: Vec3) {
        assert!((actual - expected).length() < 1.0e-4, "{actual} != {expected}");
    }

    #[test]
    fn test_hips_offset_low_pass() {
        let (mut ik, skeleton) = torso();
        let under = skeleton.relative_default_poses();
        // The forearm is not a limb tip, so no downward bias applies.
        let targets = [offset_target(&skeleton, IkTargetType::RotationAndPosition, 3, Vec3::new(0.0, 0.0, 5.0))];

        // dt / timescale = 0.1 of the raw discrepancy per step.
        ik.compute_hips_offset(&skeleton, &targets, &under, 0.01);
        assert_vec_eq(ik.hips_offset(), Vec3::new(0.0, 0.0, 0.5));
        ik.compute_hips_offset(&skeleton, &targets, &under, 0.01);
        assert_vec_eq(ik.hips_offset(), Vec3::new(0.0, 0.0, 0.95));

        // A step at least as long as the timescale jumps straight there.
        ik.compute_hips_offset(&skeleton, &targets, &under, 0.2);
        assert_vec_eq(ik.hips_offset(), Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn test_hips_offset_limb_downward_bias() {
        let (mut ik, skeleton) = torso();
        let under = skeleton.relative_default_poses();
        let targets = [offset_target(&skeleton, IkTargetType::RotationAndPosition, 4, Vec3::ZERO)];

        ik.compute_hips_offset(&skeleton, &targets, &under, 0.01);
        assert_vec_eq(ik.hips_offset(), Vec3::new(0.0, -0.025, 0.0));

        let targets = [offset_target(&skeleton, IkTargetType::RotationAndPosition, 4, Vec3::new(10.0, 0.0, 0.0))];
        ik.hips_offset = Vec3::ZERO;
        ik.compute_hips_offset(&skeleton, &targets, &under, 1.0);
        assert_vec_eq(ik.hips_offset(), Vec3::new(10.0, -0.25, 0.0));
    }

    #[test]
    fn test_hips_offset_head_rotation_only_slaves_hips() {
        let (mut ik, skeleton) = torso();
        let under = skeleton.relative_default_poses();
        // The solved head sits 4 units ahead of the under pose.
        ik.relative_poses[1].translation += Vec3::new(0.0, 0.0, 4.0);
        let targets = [IkTarget::new(IkTargetType::RotationOnly, 1, Pose::IDENTITY)];

        ik.compute_hips_offset(&skeleton, &targets, &under, 0.01);
        assert_vec_eq(ik.hips_offset(), Vec3::new(0.0, 0.0, 0.1 * 0.65 * 4.0));
    }

    #[test]
    fn test_hips_offset_head_position_pressure() {
        let (mut ik, skeleton) = torso();
        let under = skeleton.relative_default_poses();
        let targets = [
            offset_target(&skeleton, IkTargetType::RotationAndPosition, 1, Vec3::new(0.0, 0.0, 10.0)),
            offset_target(&skeleton, IkTargetType::RotationAndPosition, 4, Vec3::new(10.0, 0.0, 0.0)),
        ];

        // Head discrepancy scaled by the pressure, then the hand and its bias.
        ik.compute_hips_offset(&skeleton, &targets, &under, 1.0);
        assert_vec_eq(ik.hips_offset(), Vec3::new(10.0, -0.25, 9.5));
    }

    #[test]
    fn test_blend_to_poses() {
        let mut accumulators = vec![RotationAccumulator::default(); 2];
        accumulators[0].add(Quat::IDENTITY, 1.0);
        let turned = Quat::from_rotation_z(1.0);
        let mut relative = vec![Pose::from_rotation(turned); 2];
        let under = vec![Pose::from_translation(Vec3::X); 2];

        blend_to_poses(&mut relative, &accumulators, &under, &under, 0.5);

        // Dirty joint moved halfway, clean joint snapped.
        assert!(relative[0].rotation.dot(Quat::from_rotation_z(0.5)).abs() > 0.9999);
        assert_eq!(relative[1].rotation, Quat::IDENTITY);
        assert!(relative.iter().all(|p| p.translation == Vec3::X));
    }

    #[test]
    fn test_solution_sources() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(chain_skeleton());
        ik.set_constraint(
            2,
            Box::new(ElbowConstraint::new(Quat::IDENTITY, Vec3::Z).with_angle_limits(0.0, 1.0)),
        );
        let under = chain_skeleton().relative_default_poses();
        let previous = vec![Pose::from_rotation(Quat::from_rotation_x(0.2)); 4];

        ik.relative_poses.clone_from(&previous);
        ik.init_from_solution_source(SolutionSource::PreviousSolution, &under);
        assert_eq!(ik.relative_poses, previous);

        ik.init_from_solution_source(SolutionSource::UnderPoses, &under);
        assert_eq!(ik.relative_poses, under);

        ik.init_from_solution_source(SolutionSource::LimitCenterPoses, &under);
        assert_eq!(ik.relative_poses, ik.limit_center_poses);
        let center = ik.relative_poses[2].rotation;
        assert!(center.dot(Quat::from_rotation_z(0.5)).abs() > 0.9999);
    }

    #[test]
    fn test_solution_source_variable_overrides_config() {
        let mut config = IkConfig::default();
        config.solution_source_var = "ikSolutionSource".into();
        let mut ik = InverseKinematics::new(config);
        ik.set_skeleton(chain_skeleton());
        ik.set_target_var(IkTargetVar::new("tip").with_position_var("tipPosition"));
        let mut vars = VariableMap::new();
        vars.set_vec3("tipPosition", Vec3::new(1.0, 1.5, 0.0));
        let under = chain_skeleton().relative_default_poses();

        let first = ik.overlay(&vars, &AnimContext::default(), 0.01, &under).to_vec();
        vars.set_int("ikSolutionSource", SolutionSource::PreviousSolution as i32);
        ik.overlay(&vars, &AnimContext::default(), 0.01, &under);

        // Starting from a converged solution takes a single pass.
        assert_eq!(ik.last_stats().iterations, 1);
        let tip = chain_skeleton().absolute_pose(3, &first).translation;
        assert!((tip - Vec3::new(1.0, 1.5, 0.0)).length() < 0.1);
    }

    #[test]
    fn test_reaches_target() {
        let (mut ik, vars) = reach(Vec3::new(1.0, 1.5, 0.0));
        let skeleton = chain_skeleton();
        let under = skeleton.relative_default_poses();

        let result = ik.overlay(&vars, &AnimContext::default(), 1.0 / 60.0, &under).to_vec();
        let tip = skeleton.absolute_pose(3, &result).translation;
        assert!((tip - Vec3::new(1.0, 1.5, 0.0)).length() < 0.1);
        assert!(ik.last_stats().max_error < 0.1);
        assert!(ik.is_ik_affected(2));
        assert!(!ik.is_ik_affected(0));
    }

    #[test]
    fn test_no_targets_passes_through() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(chain_skeleton());
        let mut under = chain_skeleton().relative_default_poses();
        under[2].rotation = Quat::from_rotation_x(0.3);

        let result = ik.overlay(&VariableMap::new(), &AnimContext::default(), 0.01, &under);
        assert_eq!(result, under.as_slice());
        assert!((0..4).all(|i| !ik.is_ik_affected(i)));
    }

    #[test]
    fn test_mismatched_under_pose_passes_through() {
        let (mut ik, vars) = reach(Vec3::X);
        let under = vec![Pose::IDENTITY; 2];
        let result = ik.overlay(&vars, &AnimContext::default(), 0.01, &under);
        assert_eq!(result, under.as_slice());
    }

    #[test]
    fn test_duplicate_target_var_replaced() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_target_var(IkTargetVar::new("tip").with_weight(0.5));
        ik.set_target_var(IkTargetVar::new("tip").with_weight(2.0));
        assert_eq!(ik.target_var_count(), 1);
        assert_eq!(ik.target_vars()[0].weight, 2.0);

        ik.set_target_vars([IkTargetVar::new("upper"), IkTargetVar::new("lower")]);
        let names: Vec<&str> = ik.target_vars().iter().map(|v| v.joint_name.as_str()).collect();
        assert_eq!(names, ["upper", "lower"]);
    }

    #[test]
    fn test_unknown_type_skipped() {
        let (mut ik, mut vars) = reach(Vec3::new(1.0, 1.5, 0.0));
        ik.set_target_var(
            IkTargetVar::new("tip")
                .with_position_var("tipPosition")
                .with_type_var("tipType"),
        );
        vars.set_int("tipType", IkTargetType::Unknown as i32);
        let under = chain_skeleton().relative_default_poses();

        let result = ik.overlay(&vars, &AnimContext::default(), 0.01, &under);
        assert_eq!(result, under.as_slice());
    }

    #[test]
    fn test_rotation_only_final_pass() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(chain_skeleton());
        ik.set_target_var(
            IkTargetVar::new("tip")
                .with_rotation_var("tipRotation")
                .with_type_var("tipType"),
        );
        let mut vars = VariableMap::new();
        let rotation = Quat::from_rotation_x(0.7);
        vars.set_quat("tipRotation", rotation);
        vars.set_int("tipType", IkTargetType::RotationOnly as i32);
        let under = chain_skeleton().relative_default_poses();

        let result = ik.overlay(&vars, &AnimContext::default(), 0.01, &under).to_vec();
        let absolute = chain_skeleton().absolute_pose(3, &result);
        assert!(absolute.rotation.dot(rotation).abs() > 0.9999);
        // Only the tip moved.
        assert_eq!(result[1], under[1]);
        assert_eq!(result[2], under[2]);
    }

    #[test]
    fn test_max_hips_offset_length_in_meters() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_max_hips_offset_length(0.2);
        assert!((ik.config().max_hips_offset_length - 20.0).abs() < 1.0e-5);
    }

    #[test]
    fn test_clear_joint_limit_history() {
        let mut ik = InverseKinematics::new(IkConfig::default());
        ik.set_skeleton(chain_skeleton());
        ik.set_constraint(
            2,
            Box::new(ElbowConstraint::new(Quat::IDENTITY, Vec3::Z).with_angle_limits(0.0, 1.0)),
        );

        // The animation bends past the limit, which widens it.
        let mut under = chain_skeleton().relative_default_poses();
        under[2].rotation = Quat::from_rotation_z(1.5);
        ik.overlay(&VariableMap::new(), &AnimContext::default(), 0.01, &under);
        let mut rotation = Quat::from_rotation_z(1.4);
        assert!(!ik.constraint(2).unwrap().apply(&mut rotation));

        ik.clear_joint_limit_history();
        assert!(ik.constraint(2).unwrap().apply(&mut rotation));
    }

    #[test]
    fn test_debug_snapshot_only_when_requested() {
        let (mut ik, vars) = reach(Vec3::new(1.0, 1.5, 0.0));
        let under = chain_skeleton().relative_default_poses();

        ik.overlay(&vars, &AnimContext::default(), 0.01, &under);
        assert!(ik.debug_chains().is_none());
        assert!(!ik.last_chains().is_empty());

        let context = AnimContext::default().with_debug_ik_chains(true);
        ik.overlay(&vars, &context, 0.01, &under);
        assert_eq!(ik.debug_chains(), Some(ik.last_chains()));
    }
}
