//! Named animation variables and the per-frame evaluation context.

use crate::pose::Pose;
use glam::{Quat, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A dynamically typed animation variable.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Variant {
    /// Boolean flag.
    Bool(bool),
    /// Integer (enum selectors such as target types).
    Int(i32),
    /// Scalar.
    Float(f32),
    /// Vector.
    Vec3(Vec3),
    /// Rotation.
    Quat(Quat),
}

/// Read access to the animation graph's variable store.
///
/// Empty names are never bound, so optional bindings can be left blank.
/// Lookups of a mismatched type fall back to the default, except that
/// ints and floats convert into each other.
pub trait AnimVariables {
    /// Returns the raw variable, if bound.
    fn get(&self, name: &str) -> Option<Variant>;

    /// Reads a float.
    fn lookup_float(&self, name: &str, default: f32) -> f32 {
        match self.bound(name) {
            Some(Variant::Float(v)) => v,
            Some(Variant::Int(v)) => v as f32,
            _ => default,
        }
    }

    /// Reads an int.
    fn lookup_int(&self, name: &str, default: i32) -> i32 {
        match self.bound(name) {
            Some(Variant::Int(v)) => v,
            Some(Variant::Float(v)) => v as i32,
            _ => default,
        }
    }

    /// Reads a bool.
    fn lookup_bool(&self, name: &str, default: bool) -> bool {
        match self.bound(name) {
            Some(Variant::Bool(v)) => v,
            _ => default,
        }
    }

    /// Reads a vector.
    fn lookup_vec3(&self, name: &str, default: Vec3) -> Vec3 {
        match self.bound(name) {
            Some(Variant::Vec3(v)) => v,
            _ => default,
        }
    }

    /// Reads a rotation.
    fn lookup_quat(&self, name: &str, default: Quat) -> Quat {
        match self.bound(name) {
            Some(Variant::Quat(v)) => v,
            _ => default,
        }
    }

    #[doc(hidden)]
    fn bound(&self, name: &str) -> Option<Variant> {
        if name.is_empty() {
            None
        } else {
            self.get(name)
        }
    }
}

/// A [`HashMap`]-backed variable store.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VariableMap {
    values: HashMap<String, Variant>,
}

impl VariableMap {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Variant) {
        self.values.insert(name.into(), value);
    }

    /// Sets a float variable.
    pub fn set_float(&mut self, name: impl Into<String>, value: f32) {
        self.set(name, Variant::Float(value));
    }

    /// Sets an int variable.
    pub fn set_int(&mut self, name: impl Into<String>, value: i32) {
        self.set(name, Variant::Int(value));
    }

    /// Sets a bool variable.
    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.set(name, Variant::Bool(value));
    }

    /// Sets a vector variable.
    pub fn set_vec3(&mut self, name: impl Into<String>, value: Vec3) {
        self.set(name, Variant::Vec3(value));
    }

    /// Sets a rotation variable.
    pub fn set_quat(&mut self, name: impl Into<String>, value: Quat) {
        self.set(name, Variant::Quat(value));
    }

    /// Removes a variable.
    pub fn unset(&mut self, name: &str) -> Option<Variant> {
        self.values.remove(name)
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AnimVariables for VariableMap {
    fn get(&self, name: &str) -> Option<Variant> {
        self.values.get(name).copied()
    }
}

/// Per-frame evaluation context supplied by the animation graph.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnimContext {
    /// Maps skeleton (geometry) space into rig space.
    ///
    /// Target variables are authored in rig space and mapped back through
    /// the inverse of this pose.
    pub geometry_to_rig: Pose,
    /// Keep a snapshot of the final iteration's chains for inspection.
    pub debug_ik_chains: bool,
}

impl Default for AnimContext {
    fn default() -> Self {
        Self {
            geometry_to_rig: Pose::IDENTITY,
            debug_ik_chains: false,
        }
    }
}

impl AnimContext {
    /// Creates a context with the given geometry-to-rig pose.
    pub fn new(geometry_to_rig: Pose) -> Self {
        Self {
            geometry_to_rig,
            debug_ik_chains: false,
        }
    }

    /// Enables or disables chain snapshots.
    pub fn with_debug_ik_chains(mut self, enabled: bool) -> Self {
        self.debug_ik_chains = enabled;
        self
    }

    /// Reads a rig-space point and maps it into geometry space.
    ///
    /// The default is already in geometry space and is returned unchanged.
    pub fn lookup_point(&self, vars: &dyn AnimVariables, name: &str, default: Vec3) -> Vec3 {
        match vars.bound(name) {
            Some(Variant::Vec3(v)) => self.geometry_to_rig.inverse().transform_point(v),
            _ => default,
        }
    }

    /// Reads a rig-space direction and maps it into geometry space.
    pub fn lookup_direction(&self, vars: &dyn AnimVariables, name: &str, default: Vec3) -> Vec3 {
        match vars.bound(name) {
            Some(Variant::Vec3(v)) => self.geometry_to_rig.inverse().transform_vector(v),
            _ => default,
        }
    }

    /// Reads a rig-space rotation and maps it into geometry space.
    pub fn lookup_rotation(&self, vars: &dyn AnimVariables, name: &str, default: Quat) -> Quat {
        match vars.bound(name) {
            Some(Variant::Quat(q)) => (self.geometry_to_rig.rotation.inverse() * q).normalize(),
            _ => default,
        }
    }
}
