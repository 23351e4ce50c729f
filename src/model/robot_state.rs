use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

use super::{Pose, Status};

/// A named joint-position vector. `positions` and `names` must have equal
/// length; use [`JointState::new`] rather than constructing the struct
/// literal directly so that invariant is enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub positions: Vec<f64>,
    pub names: Vec<String>,
}

impl JointState {
    pub fn new(positions: Vec<f64>, names: Vec<String>) -> Result<Self, RuntimeError> {
        if positions.len() != names.len() {
            return Err(RuntimeError::LengthMismatch {
                what: "joint state positions/names",
                left: positions.len(),
                right: names.len(),
            });
        }
        Ok(JointState { positions, names })
    }

    pub fn empty() -> Self {
        JointState {
            positions: Vec::new(),
            names: Vec::new(),
        }
    }
}

/// A named role of an end-effector link, e.g. the mandatory
/// [`ContactAnnotation::CENTER`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactAnnotation(pub String);

impl ContactAnnotation {
    pub const CENTER_NAME: &'static str = "CONTACT_CENTER";

    pub fn center() -> Self {
        ContactAnnotation(Self::CENTER_NAME.to_string())
    }
}

impl From<&str> for ContactAnnotation {
    fn from(s: &str) -> Self {
        ContactAnnotation(s.to_string())
    }
}

/// Tagged union over the roles a robot can occupy. Skills pattern-match on
/// this directly; code written against a concrete variant gets a compile
/// error for a missing capability, and boundary code (decoders) that
/// pattern-matches an arbitrary `RobotState` gets a well-defined `Failed`
/// via [`RobotState::base_pose`]-style accessors instead of a panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotState {
    MobileBase {
        base_pose: Pose,
    },
    Manipulator {
        joints: JointState,
        base_pose: Pose,
    },
    EndEffector {
        joints: JointState,
        parent_link: String,
        base_pose: Pose,
        contacts: HashMap<ContactAnnotation, (String, Pose)>,
    },
    MobileManipulator {
        base_pose: Pose,
        manipulators: Vec<(String, JointState)>,
        end_effectors: Vec<(String, JointState, HashMap<ContactAnnotation, (String, Pose)>)>,
    },
}

impl RobotState {
    /// The base pose common to every variant.
    pub fn base_pose(&self) -> Pose {
        match self {
            RobotState::MobileBase { base_pose } => *base_pose,
            RobotState::Manipulator { base_pose, .. } => *base_pose,
            RobotState::EndEffector { base_pose, .. } => *base_pose,
            RobotState::MobileManipulator { base_pose, .. } => *base_pose,
        }
    }

    /// The joint state, for variants that carry one. `Failed`-flavored
    /// boundary code should treat `None` as "wrong kind of robot for this
    /// operation" rather than panicking.
    pub fn joints(&self) -> Option<&JointState> {
        match self {
            RobotState::MobileBase { .. } => None,
            RobotState::Manipulator { joints, .. } => Some(joints),
            RobotState::EndEffector { joints, .. } => Some(joints),
            RobotState::MobileManipulator { .. } => None,
        }
    }

    pub fn contacts(&self) -> Option<&HashMap<ContactAnnotation, (String, Pose)>> {
        match self {
            RobotState::EndEffector { contacts, .. } => Some(contacts),
            _ => None,
        }
    }

    /// Looks up a contact annotation's link pose, surfacing "missing
    /// capability" as `Status::Failed` rather than a panic, per §9's
    /// redesign note on polymorphic robot state.
    pub fn contact_pose(&self, annotation: &ContactAnnotation) -> Result<Pose, Status> {
        match self.contacts().and_then(|c| c.get(annotation)) {
            Some((_, pose)) => Ok(*pose),
            None => Err(Status::failed(format!(
                "robot has no contact annotation '{}'",
                annotation.0
            ))),
        }
    }
}

/// Per-step snapshot: every known robot's state plus an overall status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedRobotState {
    pub robot_states: HashMap<String, RobotState>,
    pub status: Status,
}

impl CombinedRobotState {
    pub fn new(robot_states: HashMap<String, RobotState>, status: Status) -> Self {
        CombinedRobotState {
            robot_states,
            status,
        }
    }

    pub fn empty() -> Self {
        CombinedRobotState {
            robot_states: HashMap::new(),
            status: Status::unknown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_state_rejects_length_mismatch() {
        let err = JointState::new(vec![0.0, 1.0], vec!["a".into()]).unwrap_err();
        assert!(matches!(err, RuntimeError::LengthMismatch { .. }));
    }

    #[test]
    fn contact_pose_missing_annotation_is_failed_not_panic() {
        let state = RobotState::EndEffector {
            joints: JointState::empty(),
            parent_link: "wrist".into(),
            base_pose: Pose::identity(),
            contacts: HashMap::new(),
        };
        let err = state.contact_pose(&ContactAnnotation::center()).unwrap_err();
        assert_eq!(err.kind, crate::model::StatusKind::Failed);
    }

    #[test]
    fn mobile_base_has_no_joints() {
        let state = RobotState::MobileBase {
            base_pose: Pose::identity(),
        };
        assert!(state.joints().is_none());
    }
}
