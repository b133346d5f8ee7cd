//! Swing-twist constraint for ball joints.

use crate::constraint::RotationConstraint;
use crate::math::{signed_twist_angle, swing_twist_decomposition};
use glam::{Quat, Vec3};
use std::f32::consts::{PI, TAU};

/// Number of azimuth samples used for elliptical and direction-based limits.
pub const SWING_SUBDIVISIONS: usize = 16;

/// Extra room left below an observed swing so it survives float round-off.
const ADJUSTMENT_SLACK: f32 = 1.0e-5;

/// Azimuth of a swing, measured from the swing axis `Y x swung` in the
/// constraint's XZ plane.
///
/// Theta 0 swings about +X (forward/backward), theta PI/2 about -Z
/// (side to side).
pub fn swing_theta(swung: Vec3) -> f32 {
    let axis = Vec3::Y.cross(swung);
    (-axis.z).atan2(axis.x)
}

/// Minimum allowed `dot(swung_y, Y)` as a function of swing azimuth.
///
/// Samples are uniformly spaced over a full turn; the table stores the
/// first sample again at the end so interpolation wraps.
#[derive(Debug, Clone, PartialEq)]
pub struct SwingLimitFunction {
    configured: Vec<f32>,
    min_dots: Vec<f32>,
}

impl Default for SwingLimitFunction {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SwingLimitFunction {
    /// Creates a limit function from uniformly spaced samples.
    ///
    /// No samples means no swing limit, a single sample a circular cone.
    pub fn new(samples: Vec<f32>) -> Self {
        let mut min_dots: Vec<f32> = match samples.len() {
            0 => vec![-1.0],
            _ => samples.iter().map(|d| d.clamp(-1.0, 1.0)).collect(),
        };
        min_dots.push(min_dots[0]);
        Self {
            configured: min_dots.clone(),
            min_dots,
        }
    }

    /// Current samples, including the wrap-around duplicate.
    pub fn min_dots(&self) -> &[f32] {
        &self.min_dots
    }

    fn locate(&self, theta: f32) -> (usize, usize, f32) {
        let segments = self.min_dots.len() - 1;
        let normalized = (theta / TAU).rem_euclid(1.0);
        let scaled = normalized * segments as f32;
        let i = (scaled.floor() as usize).min(segments - 1);
        (i, i + 1, scaled - i as f32)
    }

    /// Interpolated minimum dot at azimuth `theta`.
    pub fn min_dot(&self, theta: f32) -> f32 {
        let (i, j, frac) = self.locate(theta);
        self.min_dots[i] * (1.0 - frac) + self.min_dots[j] * frac
    }

    /// Lowers the two samples around `theta` so `observed` is allowed.
    pub fn dynamically_adjust(&mut self, theta: f32, observed: f32) {
        self.min_dots.clone_from(&self.configured);
        let interpolated = self.min_dot(theta);
        if observed >= interpolated {
            return;
        }

        let delta = interpolated - observed + ADJUSTMENT_SLACK;
        let (i, j, _) = self.locate(theta);
        let last = self.min_dots.len() - 1;
        for index in [i, j] {
            self.min_dots[index] = (self.min_dots[index] - delta).max(-1.0);
        }
        // Keep the wrap-around sample in sync with the first one.
        if i == 0 {
            self.min_dots[last] = self.min_dots[0];
        } else if j == last {
            self.min_dots[0] = self.min_dots[last];
        }
    }

    /// Discards any dynamic adjustment.
    pub fn reset(&mut self) {
        self.min_dots.clone_from(&self.configured);
    }
}

/// Limits a joint's twist about its reference Y axis and the cone its
/// Y axis may swing through.
#[derive(Debug, Clone)]
pub struct SwingTwistConstraint {
    reference_rotation: Quat,
    min_twist: f32,
    max_twist: f32,
    configured_twist: (f32, f32),
    swing_limits: SwingLimitFunction,
    lower_spine: bool,
}

impl SwingTwistConstraint {
    /// Creates an unconstrained swing-twist joint around `reference_rotation`.
    pub fn new(reference_rotation: Quat) -> Self {
        Self {
            reference_rotation,
            min_twist: -PI,
            max_twist: PI,
            configured_twist: (-PI, PI),
            swing_limits: SwingLimitFunction::default(),
            lower_spine: false,
        }
    }

    /// Sets the twist range (radians). Equal limits disable twist limiting.
    pub fn with_twist_limits(mut self, min: f32, max: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min_twist = min;
        self.max_twist = max;
        self.configured_twist = (min, max);
        self
    }

    /// Sets the swing envelope from uniformly spaced minimum dot products.
    pub fn with_swing_min_dots(mut self, min_dots: Vec<f32>) -> Self {
        self.swing_limits = SwingLimitFunction::new(min_dots);
        self
    }

    /// Sets a circular swing cone with the given half-angle.
    pub fn with_cone(self, max_swing: f32) -> Self {
        self.with_swing_min_dots(vec![max_swing.cos()])
    }

    /// Sets an elliptical swing cone.
    ///
    /// `lateral` limits side-to-side swings, `anterior` forward and backward.
    pub fn with_elliptical_swing(self, lateral: f32, anterior: f32) -> Self {
        let d_theta = TAU / SWING_SUBDIVISIONS as f32;
        let min_dots = (0..SWING_SUBDIVISIONS)
            .map(|i| {
                let theta = i as f32 * d_theta;
                let theta_prime = ((anterior / lateral) * theta.tan()).atan();
                let phi = (2.0 * theta_prime).cos() * ((anterior - lateral) / 2.0)
                    + (anterior + lateral) / 2.0;
                phi.cos()
            })
            .collect();
        self.with_swing_min_dots(min_dots)
    }

    /// Sets the swing envelope from boundary directions in the joint's
    /// reference frame. Directions need not be normalized.
    pub fn with_swung_directions(self, directions: &[Vec3]) -> Self {
        let mut entries: Vec<(f32, f32)> = directions
            .iter()
            .filter_map(|d| {
                let d = d.normalize_or_zero();
                (d != Vec3::ZERO).then(|| (swing_theta(d).rem_euclid(TAU), d.y))
            })
            .collect();
        if entries.is_empty() {
            return self.with_swing_min_dots(Vec::new());
        }
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));

        let count = SWING_SUBDIVISIONS.max(entries.len());
        let min_dots = (0..count)
            .map(|i| interpolate_wrapped(&entries, TAU * i as f32 / count as f32))
            .collect();
        self.with_swing_min_dots(min_dots)
    }

    /// Marks the joint as part of the lower spine.
    pub fn with_lower_spine(mut self, lower_spine: bool) -> Self {
        self.lower_spine = lower_spine;
        self
    }

    /// Current minimum twist.
    pub fn min_twist(&self) -> f32 {
        self.min_twist
    }

    /// Current maximum twist.
    pub fn max_twist(&self) -> f32 {
        self.max_twist
    }

    /// The swing envelope.
    pub fn swing_limits(&self) -> &SwingLimitFunction {
        &self.swing_limits
    }

    fn twist_enabled(&self) -> bool {
        self.min_twist != self.max_twist
    }
}

/// Linear interpolation over `(theta, value)` entries sorted by theta,
/// wrapping around the full turn.
fn interpolate_wrapped(entries: &[(f32, f32)], theta: f32) -> f32 {
    if entries.len() == 1 {
        return entries[0].1;
    }
    let first = entries[0];
    let last = entries[entries.len() - 1];
    let (a, b) = match entries.iter().position(|e| e.0 >= theta) {
        Some(0) => ((last.0 - TAU, last.1), first),
        Some(i) => (entries[i - 1], entries[i]),
        None => (last, (first.0 + TAU, first.1)),
    };
    let span = b.0 - a.0;
    if span <= f32::EPSILON {
        return a.1;
    }
    let frac = ((theta - a.0) / span).clamp(0.0, 1.0);
    a.1 + (b.1 - a.1) * frac
}

impl RotationConstraint for SwingTwistConstraint {
    fn apply(&self, rotation: &mut Quat) -> bool {
        // rotation = swing * twist * reference
        let post_rotation = *rotation * self.reference_rotation.inverse();
        let (mut swing, twist) = swing_twist_decomposition(post_rotation, Vec3::Y);

        let mut twist_angle = signed_twist_angle(twist, Vec3::Y, Vec3::X);
        let mut clamped = false;
        if self.twist_enabled() {
            let limited = twist_angle.clamp(self.min_twist, self.max_twist);
            if limited != twist_angle {
                twist_angle = limited;
                clamped = true;
            }
        }

        let swung_y = swing * Vec3::Y;
        let swing_axis = Vec3::Y.cross(swung_y);
        let axis_length = swing_axis.length();
        if axis_length > f32::EPSILON {
            let min_dot = self.swing_limits.min_dot(swing_theta(swung_y));
            if swung_y.y < min_dot {
                swing = Quat::from_axis_angle(swing_axis / axis_length, min_dot.acos());
                clamped = true;
            }
        } else if swung_y.y < 0.0 {
            // Swung straight down: the azimuth is undefined, use theta 0.
            let min_dot = self.swing_limits.min_dot(0.0);
            if swung_y.y < min_dot {
                swing = Quat::from_axis_angle(Vec3::X, min_dot.acos());
                clamped = true;
            }
        }

        if clamped {
            *rotation =
                (swing * Quat::from_axis_angle(Vec3::Y, twist_angle) * self.reference_rotation)
                    .normalize();
        }
        clamped
    }

    fn reference_rotation(&self) -> Quat {
        self.reference_rotation
    }

    fn compute_center_rotation(&self) -> Quat {
        let twist_angle = if self.twist_enabled() {
            0.5 * (self.min_twist + self.max_twist)
        } else {
            0.0
        };

        // Average the boundary swings in axis-angle form, so symmetric
        // envelopes of any width center on Y.
        let samples = (self.swing_limits.min_dots().len() - 1).max(4);
        let mut sum = Vec3::ZERO;
        for i in 0..samples {
            let theta = TAU * i as f32 / samples as f32;
            let axis = Vec3::new(theta.cos(), 0.0, -theta.sin());
            let phi = self.swing_limits.min_dot(theta).clamp(-1.0, 1.0).acos();
            sum += axis * phi;
        }
        let swing = Quat::from_scaled_axis(sum / samples as f32);

        (swing * Quat::from_axis_angle(Vec3::Y, twist_angle) * self.reference_rotation).normalize()
    }

    fn dynamically_adjust_limits(&mut self, rotation: Quat) {
        let post_rotation = rotation * self.reference_rotation.inverse();
        let (swing, twist) = swing_twist_decomposition(post_rotation, Vec3::Y);

        let swung_y = swing * Vec3::Y;
        let theta = swing_theta(swung_y);
        let theta = if theta.is_finite() { theta } else { 0.0 };
        self.swing_limits.dynamically_adjust(theta, swung_y.y);

        let (min, max) = self.configured_twist;
        self.min_twist = min;
        self.max_twist = max;
        if self.twist_enabled() {
            let twist_angle = signed_twist_angle(twist, Vec3::Y, Vec3::X);
            self.min_twist = self.min_twist.min(twist_angle);
            self.max_twist = self.max_twist.max(twist_angle);
        }
    }

    fn clear_history(&mut self) {
        self.swing_limits.reset();
        let (min, max) = self.configured_twist;
        self.min_twist = min;
        self.max_twist = max;
    }

    fn is_lower_spine(&self) -> bool {
        self.lower_spine
    }
}
