//! Spline and curve types for interpolation.
//!
//! Provides the curve types used by the rig solvers:
//! - [`CubicHermite`] - Cubic Hermite segment defined by end points and tangents
//! - [`ArcLengthHermite`] - Hermite segment with a tabulated arc-length parameterization
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use rhizome_resin_spline::{ArcLengthHermite, CubicHermite};
//!
//! let curve = CubicHermite::new(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 2.0, 0.0), Vec3::Y);
//! let measured = ArcLengthHermite::new(curve);
//! let halfway = measured.arc_length_inverse(measured.total_length() * 0.5);
//! assert!((measured.curve().evaluate(halfway).y - 1.0).abs() < 0.01);
//! ```

use glam::{Vec2, Vec3};

/// Trait for types that can be interpolated along a curve.
pub trait Interpolatable:
    Clone
    + Copy
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<f32, Output = Self>
{
}

impl Interpolatable for f32 {}
impl Interpolatable for Vec2 {}
impl Interpolatable for Vec3 {}

/// A cubic Hermite curve segment.
///
/// Defined by a start point (P0) with tangent (M0) and an end point (P1)
/// with tangent (M1). The curve passes through both points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicHermite<T: Interpolatable> {
    /// Start point.
    pub p0: T,
    /// Tangent at the start point.
    pub m0: T,
    /// End point.
    pub p1: T,
    /// Tangent at the end point.
    pub m1: T,
}

impl<T: Interpolatable> CubicHermite<T> {
    /// Creates a new Hermite segment.
    pub fn new(p0: T, m0: T, p1: T, m1: T) -> Self {
        Self { p0, m0, p1, m1 }
    }

    /// Evaluates the curve at parameter t (0 to 1).
    pub fn evaluate(&self, t: f32) -> T {
        let t2 = t * t;
        let t3 = t2 * t;

        // H(t) = (2t³-3t²+1)P0 + (t³-2t²+t)M0 + (-2t³+3t²)P1 + (t³-t²)M1
        let w0 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let w1 = t3 - 2.0 * t2 + t;
        let w2 = -2.0 * t3 + 3.0 * t2;
        let w3 = t3 - t2;
        self.p0 * w0 + self.m0 * w1 + self.p1 * w2 + self.m1 * w3
    }

    /// Evaluates the derivative (tangent) at parameter t.
    pub fn derivative(&self, t: f32) -> T {
        let t2 = t * t;

        let w0 = 6.0 * t2 - 6.0 * t;
        let w1 = 3.0 * t2 - 4.0 * t + 1.0;
        let w2 = -6.0 * t2 + 6.0 * t;
        let w3 = 3.0 * t2 - 2.0 * t;
        self.p0 * w0 + self.m0 * w1 + self.p1 * w2 + self.m1 * w3
    }
}

/// Number of chords used to approximate arc length.
pub const ARC_LENGTH_SUBDIVISIONS: usize = 30;

/// A 3D Hermite segment with a precomputed arc-length table.
///
/// The table stores the cumulative chord length at uniformly spaced
/// parameter values, so both `arc_length(t)` and its inverse are cheap
/// piecewise-linear lookups.
#[derive(Debug, Clone)]
pub struct ArcLengthHermite {
    curve: CubicHermite<Vec3>,
    lengths: [f32; ARC_LENGTH_SUBDIVISIONS + 1],
}

impl ArcLengthHermite {
    /// Measures a Hermite segment.
    pub fn new(curve: CubicHermite<Vec3>) -> Self {
        let mut lengths = [0.0; ARC_LENGTH_SUBDIVISIONS + 1];
        let dt = 1.0 / ARC_LENGTH_SUBDIVISIONS as f32;
        let mut prev = curve.evaluate(0.0);
        let mut total = 0.0;
        for (i, length) in lengths.iter_mut().enumerate().skip(1) {
            let next = curve.evaluate(i as f32 * dt);
            total += (next - prev).length();
            *length = total;
            prev = next;
        }
        Self { curve, lengths }
    }

    /// Returns the underlying curve.
    pub fn curve(&self) -> &CubicHermite<Vec3> {
        &self.curve
    }

    /// Evaluates the curve at parameter t.
    pub fn evaluate(&self, t: f32) -> Vec3 {
        self.curve.evaluate(t)
    }

    /// Evaluates the derivative at parameter t.
    pub fn derivative(&self, t: f32) -> Vec3 {
        self.curve.derivative(t)
    }

    /// Total arc length of the segment.
    pub fn total_length(&self) -> f32 {
        self.lengths[ARC_LENGTH_SUBDIVISIONS]
    }

    /// Arc length from the start of the curve to parameter t.
    pub fn arc_length(&self, t: f32) -> f32 {
        let scaled = t.clamp(0.0, 1.0) * ARC_LENGTH_SUBDIVISIONS as f32;
        let index = (scaled.floor() as usize).min(ARC_LENGTH_SUBDIVISIONS - 1);
        let frac = scaled - index as f32;
        self.lengths[index] + (self.lengths[index + 1] - self.lengths[index]) * frac
    }

    /// Parameter t at which the given arc length is reached.
    ///
    /// Lengths outside `[0, total_length]` clamp to the curve ends. A
    /// degenerate (zero-length) curve maps everything to `t = 0`.
    pub fn arc_length_inverse(&self, s: f32) -> f32 {
        if s <= 0.0 {
            return 0.0;
        }
        if s >= self.total_length() {
            return if self.total_length() > 0.0 { 1.0 } else { 0.0 };
        }

        let dt = 1.0 / ARC_LENGTH_SUBDIVISIONS as f32;
        for i in 0..ARC_LENGTH_SUBDIVISIONS {
            let (a, b) = (self.lengths[i], self.lengths[i + 1]);
            if s <= b {
                let span = b - a;
                let frac = if span > f32::EPSILON {
                    (s - a) / span
                } else {
                    0.0
                };
                return (i as f32 + frac) * dt;
            }
        }
        1.0
    }
}
