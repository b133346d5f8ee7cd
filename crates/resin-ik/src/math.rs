//! Quaternion and vector helpers shared by the constraints and solvers.

use glam::{Mat3, Quat, Vec3};

/// Below this length an axis is treated as degenerate.
pub const MIN_AXIS_LENGTH: f32 = 1.0e-4;

/// Splits `rotation` into `swing * twist`, where `twist` rotates about
/// `direction` (unit length) and `swing` rotates about an axis
/// perpendicular to it.
pub fn swing_twist_decomposition(rotation: Quat, direction: Vec3) -> (Quat, Quat) {
    let projection = rotation.xyz().dot(direction);
    let axis = direction * projection;
    let twist = Quat::from_xyzw(axis.x, axis.y, axis.z, rotation.w);
    let twist = if twist.length_squared() > f32::EPSILON {
        twist.normalize()
    } else {
        // 180 degree swing: the twist is undefined, pick none.
        Quat::IDENTITY
    };
    let swing = rotation * twist.inverse();
    (swing, twist)
}

/// Signed angle of a pure twist rotation about `axis`, in `[-PI, PI]`.
///
/// `reference` must be perpendicular to `axis`.
pub fn signed_twist_angle(twist: Quat, axis: Vec3, reference: Vec3) -> f32 {
    let angle = 2.0 * twist.w.abs().min(1.0).acos();
    let twisted = twist * reference;
    if reference.cross(twisted).dot(axis) < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Normalized lerp from identity toward `rotation` by `fraction`,
/// taking the shorter arc.
pub fn scale_rotation(rotation: Quat, fraction: f32) -> Quat {
    Quat::IDENTITY.lerp(rotation, fraction)
}

/// Normalized component-wise lerp without hemisphere alignment.
///
/// Unlike [`Quat::lerp`] this follows whichever arc the signs of `a` and
/// `b` describe, so negating `b` selects the long way round.
pub fn lerp_unaligned(a: Quat, b: Quat, t: f32) -> Quat {
    let q = a * (1.0 - t) + b * t;
    if q.length_squared() <= f32::EPSILON {
        return a;
    }
    q.normalize()
}

/// Builds a rotation whose Y axis points along `y` and whose X axis is the
/// projection of `x_hint` onto the plane perpendicular to `y`.
///
/// When the hint is parallel to `y` an arbitrary perpendicular is used.
pub fn frame_from_y_and_x(y: Vec3, x_hint: Vec3) -> Quat {
    let y = y.normalize_or_zero();
    if y == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut z = y.cross(x_hint);
    if z.length_squared() < MIN_AXIS_LENGTH * MIN_AXIS_LENGTH {
        z = y.cross(y.any_orthonormal_vector());
    }
    let z = z.normalize();
    let x = z.cross(y);
    Quat::from_mat3(&Mat3::from_cols(x, y, x.cross(y))).normalize()
}

/// Exponential ease-out, the `expo_out` curve of `rhizome-resin-easing`.
///
/// Kept local so the solver doesn't pull in the easing crate for one curve.
#[inline]
pub fn ease_out_expo(t: f32) -> f32 {
    if t == 1.0 {
        1.0
    } else {
        1.0 - 2.0f32.powf(-10.0 * t)
    }
}

/// Component of `v` perpendicular to the unit vector `axis`.
#[inline]
pub fn reject(v: Vec3, axis: Vec3) -> Vec3 {
    v - axis * v.dot(axis)
}
