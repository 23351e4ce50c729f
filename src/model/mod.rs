//! The common data model: poses, robot/end-effector states, actions,
//! statuses, and the combined structures that bundle them per step.
//!
//! Everything here is a pure value type — no I/O, no async, no adapter
//! awareness. The rest of the crate builds on top of these shapes.

mod action;
mod pose;
mod quaternion;
mod robot_state;
mod status;

pub use action::{CombinedRobotAction, RobotAction, SolveByType};
pub use pose::{Point, Pose};
pub use quaternion::Quaternion;
pub use robot_state::{CombinedRobotState, ContactAnnotation, JointState, RobotState};
pub use status::{Reason, Status, StatusKind};
