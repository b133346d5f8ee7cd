//! Joint hierarchy and relative/absolute pose conversion.

use crate::error::SkeletonError;
use crate::pose::Pose;
use std::collections::HashSet;

/// A joint in a skeleton.
#[derive(Debug, Clone)]
pub struct Joint {
    /// Human-readable name.
    pub name: String,
    /// Parent joint index (None for roots).
    pub parent: Option<usize>,
    /// Default pose relative to the parent joint.
    pub default_pose: Pose,
}

impl Joint {
    /// Creates a root joint.
    pub fn new(name: impl Into<String>, default_pose: Pose) -> Self {
        Self {
            name: name.into(),
            parent: None,
            default_pose,
        }
    }

    /// Sets the parent joint.
    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A skeleton: joints stored in topological order.
///
/// Every joint's parent has a lower index than the joint itself, so a single
/// forward pass over the array converts relative poses to absolute ones.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    joints: Vec<Joint>,
    absolute_defaults: Vec<Pose>,
}

impl Skeleton {
    /// Builds a skeleton, validating the joint order and names.
    pub fn new(joints: Vec<Joint>) -> Result<Self, SkeletonError> {
        let mut names = HashSet::with_capacity(joints.len());
        for (index, joint) in joints.iter().enumerate() {
            if let Some(parent) = joint.parent
                && parent >= index
            {
                return Err(SkeletonError::ParentOutOfOrder {
                    joint: index,
                    parent,
                });
            }
            if !names.insert(joint.name.as_str()) {
                return Err(SkeletonError::DuplicateJointName(joint.name.clone()));
            }
        }

        let defaults: Vec<Pose> = joints.iter().map(|j| j.default_pose).collect();
        let mut skeleton = Self {
            joints,
            absolute_defaults: Vec::new(),
        };
        skeleton.absolute_defaults = skeleton.compute_absolute_poses(&defaults);
        Ok(skeleton)
    }

    /// Returns the number of joints.
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Returns true if there are no joints.
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Returns all joints.
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// Returns a joint by index.
    pub fn joint(&self, index: usize) -> Option<&Joint> {
        self.joints.get(index)
    }

    /// Returns a joint's name.
    pub fn joint_name(&self, index: usize) -> Option<&str> {
        self.joints.get(index).map(|j| j.name.as_str())
    }

    /// Finds a joint by name.
    pub fn find_joint(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// Returns a joint's parent.
    pub fn parent(&self, index: usize) -> Option<usize> {
        self.joints.get(index).and_then(|j| j.parent)
    }

    /// Default pose of a joint relative to its parent.
    pub fn relative_default_pose(&self, index: usize) -> Pose {
        self.joints
            .get(index)
            .map(|j| j.default_pose)
            .unwrap_or(Pose::IDENTITY)
    }

    /// Default pose of a joint in the root frame.
    pub fn absolute_default_pose(&self, index: usize) -> Pose {
        self.absolute_defaults
            .get(index)
            .copied()
            .unwrap_or(Pose::IDENTITY)
    }

    /// All default relative poses, in joint order.
    pub fn relative_default_poses(&self) -> Vec<Pose> {
        self.joints.iter().map(|j| j.default_pose).collect()
    }

    /// Converts relative poses to absolute poses.
    ///
    /// Processes `min(relative.len(), joint_count)` joints; callers are
    /// expected to pass one pose per joint.
    pub fn compute_absolute_poses(&self, relative: &[Pose]) -> Vec<Pose> {
        let count = relative.len().min(self.joints.len());
        let mut absolute: Vec<Pose> = Vec::with_capacity(count);
        for (index, relative_pose) in relative.iter().take(count).enumerate() {
            let pose = match self.joints[index].parent {
                Some(parent) => absolute[parent].then(relative_pose),
                None => *relative_pose,
            };
            absolute.push(pose);
        }
        absolute
    }

    /// Absolute pose of a single joint, walking up to its root.
    pub fn absolute_pose(&self, index: usize, relative: &[Pose]) -> Pose {
        let mut pose = Pose::IDENTITY;
        let mut current = Some(index);

        // Collect chain from joint to root
        let mut chain = Vec::new();
        while let Some(joint) = current {
            if joint >= relative.len() {
                break;
            }
            chain.push(joint);
            current = self.parent(joint);
        }

        // Apply from root to joint
        for joint in chain.into_iter().rev() {
            pose = pose.then(&relative[joint]);
        }
        pose
    }

    /// Returns true if `ancestor` lies on the path from `joint` to its root.
    pub fn is_ancestor(&self, ancestor: usize, joint: usize) -> bool {
        let mut current = self.parent(joint);
        while let Some(index) = current {
            if index == ancestor {
                return true;
            }
            current = self.parent(index);
        }
        false
    }
}
