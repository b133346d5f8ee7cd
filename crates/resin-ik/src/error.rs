//! Error types for resin-ik.

use thiserror::Error;

/// Errors raised while building a [`Skeleton`](crate::Skeleton).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkeletonError {
    /// A joint refers to a parent that does not precede it.
    #[error("joint {joint} has parent {parent}, parents must precede their children")]
    ParentOutOfOrder {
        /// Index of the offending joint.
        joint: usize,
        /// Parent index it referred to.
        parent: usize,
    },

    /// Two joints share a name.
    #[error("duplicate joint name: {0}")]
    DuplicateJointName(String),
}
