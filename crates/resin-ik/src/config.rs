//! Solver configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where the working pose starts from before each solve.
///
/// The integer values are what the solution-source variable uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolutionSource {
    /// Relax IK-affected joints toward the under pose.
    #[default]
    RelaxToUnderPoses = 0,
    /// Relax IK-affected joints toward the constraint centers.
    RelaxToLimitCenterPoses = 1,
    /// Start from last frame's result.
    PreviousSolution = 2,
    /// Start from the under pose.
    UnderPoses = 3,
    /// Start from the constraint centers.
    LimitCenterPoses = 4,
}

impl SolutionSource {
    /// Converts a variable value, returning `None` for unknown values.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::RelaxToUnderPoses),
            1 => Some(Self::RelaxToLimitCenterPoses),
            2 => Some(Self::PreviousSolution),
            3 => Some(Self::UnderPoses),
            4 => Some(Self::LimitCenterPoses),
            _ => None,
        }
    }
}

/// Configuration for the IK overlay.
///
/// Lengths are in skeleton units; the defaults assume centimetre rigs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IkConfig {
    /// Maximum relaxation iterations per frame.
    pub max_iterations: u32,
    /// Stop once every positional target is within this distance.
    pub error_tolerance: f32,
    /// Fraction moved toward the solution source each frame.
    pub relax_blend_factor: f32,
    /// Frame time is clamped to this many seconds.
    pub max_overlay_dt: f32,
    /// Time constant of the hips offset low-pass filter, in seconds.
    pub hips_offset_timescale: f32,
    /// Hips offsets shorter than this are ignored.
    pub min_hips_offset_length: f32,
    /// Hips offsets are clamped to this length.
    pub max_hips_offset_length: f32,
    /// Skeleton units per meter.
    pub units_per_meter: f32,
    /// Share of a rotation-only head's drift that moves the hips.
    pub head_offset_slave_factor: f32,
    /// Scale applied to the hips offset after a positioned head contributes.
    pub hips_pressure_scale: f32,
    /// Downward hips bias added per positioned limb target.
    pub hips_downward_bias: f32,
    /// Share of an HMD head's rotation each pivot absorbs.
    pub hmd_angle_distribution: f32,
    /// Share of a tip's missing twist pushed onto its pivot per iteration.
    pub limit_leak_fraction: f32,
    /// Spline-driven bones may stretch or compress by this fraction.
    pub stretch_compress_fraction: f32,
    /// Default solution source.
    pub solution_source: SolutionSource,
    /// Int variable overriding the solution source; empty means none.
    pub solution_source_var: String,
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            error_tolerance: 0.1,
            relax_blend_factor: 1.0 / 16.0,
            max_overlay_dt: 1.0 / 30.0,
            hips_offset_timescale: 0.1,
            min_hips_offset_length: 0.03,
            max_hips_offset_length: f32::MAX,
            units_per_meter: 100.0,
            head_offset_slave_factor: 0.65,
            hips_pressure_scale: 0.95,
            hips_downward_bias: 0.25,
            hmd_angle_distribution: 0.45,
            limit_leak_fraction: 0.1,
            stretch_compress_fraction: 0.15,
            solution_source: SolutionSource::RelaxToUnderPoses,
            solution_source_var: String::new(),
        }
    }
}

impl IkConfig {
    /// Sets the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the convergence tolerance.
    pub fn with_error_tolerance(mut self, tolerance: f32) -> Self {
        self.error_tolerance = tolerance;
        self
    }

    /// Sets the default solution source.
    pub fn with_solution_source(mut self, source: SolutionSource) -> Self {
        self.solution_source = source;
        self
    }
}
