//! Configuration-time and registry-resolution errors.
//!
//! `RuntimeError` is distinct from [`Status`](crate::model::Status): it
//! covers failures that happen before a skill ever runs — a malformed
//! topology description, a name the registry doesn't recognize, a joint
//! state whose arrays disagree in length. Once execution is underway,
//! outcomes are reported as `Status` values, never as `RuntimeError`.

use std::fmt;

/// Errors raised while building a [`KinematicsEngine`](crate::kinematics::KinematicsEngine),
/// [`ControllerEngine`](crate::controller::ControllerEngine), or resolving a
/// name through the [`registry`](crate::registry) module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A topology node is missing a required field (`unique_id`, `parent_link`, `model`, ...).
    MissingField { node: String, field: &'static str },
    /// More than one node carries a `MobileBase`/`MobileManipulator` role.
    DuplicateMobileRoot { first: String, second: String },
    /// A `sensor` node has no `parent_link`/parent id.
    OrphanSensor { id: String },
    /// A node does not carry exactly one role key.
    MalformedNode { id: String, reason: String },
    /// A non-root node's `parent_id` does not resolve to any known node.
    UnknownParent { id: String, parent_id: String },
    /// A registry has no factory registered under this name.
    UnknownFactory { kind: &'static str, name: String },
    /// Two parallel sequences (e.g. joint positions/names) disagree in length.
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },
    /// The `kinematics`/`controller` engine fields were absent from configuration.
    MissingEngine { which: &'static str },
    /// No `MobileBase`/`MobileManipulator`/`Manipulator` node exists to act as the base.
    NoBaseCandidate,
    /// A lower-level adapter/connect failure wrapped with context.
    Adapter {
        id: String,
        source: String,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::MissingField { node, field } => {
                write!(f, "node '{}' is missing required field '{}'", node, field)
            }
            RuntimeError::DuplicateMobileRoot { first, second } => write!(
                f,
                "more than one mobile root: '{}' and '{}' both claim a mobile role",
                first, second
            ),
            RuntimeError::OrphanSensor { id } => {
                write!(f, "sensor '{}' has no parent id", id)
            }
            RuntimeError::MalformedNode { id, reason } => {
                write!(f, "node '{}' is malformed: {}", id, reason)
            }
            RuntimeError::UnknownParent { id, parent_id } => write!(
                f,
                "node '{}' references unknown parent_id '{}'",
                id, parent_id
            ),
            RuntimeError::UnknownFactory { kind, name } => {
                write!(f, "no {} registered under name '{}'", kind, name)
            }
            RuntimeError::LengthMismatch { what, left, right } => write!(
                f,
                "{} length mismatch: {} vs {}",
                what, left, right
            ),
            RuntimeError::MissingEngine { which } => {
                write!(f, "configuration is missing the '{}' engine", which)
            }
            RuntimeError::NoBaseCandidate => {
                write!(f, "no mobile base or manipulator node found to act as the base")
            }
            RuntimeError::Adapter { id, source } => {
                write!(f, "adapter '{}' failed: {}", id, source)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identifying_detail() {
        let err = RuntimeError::UnknownFactory {
            kind: "model_robot",
            name: "acme_arm_v2".to_string(),
        };
        assert!(err.to_string().contains("acme_arm_v2"));
    }
}
