use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Pose, RobotState};

/// Discriminant for [`RobotAction`], also used to key the kinematics
/// engine's per-robot action log (§3 "Action log").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolveByType {
    Null,
    InitRobot,
    Fk,
    Ik,
    Nav3D,
    PointTo,
    Command,
}

/// One commanded action for one robot. The `Ik`/`Nav3D` variants carry the
/// full §3 payload; `fixed_shape`/`context`/etc. default to `None` so
/// skills that don't need them can construct with `..Default::default()`-
/// style partial literals via the named constructors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotAction {
    NullAction,
    InitRobot,
    FkAction {
        goal: RobotState,
    },
    IkAction {
        goal: Pose,
        source_links: Vec<String>,
        fixed_shape: Option<RobotState>,
        context: Option<serde_json::Value>,
        start_posture: Option<Vec<f64>>,
        end_posture: Option<Vec<f64>>,
        posture_rate: Option<f64>,
    },
    Nav3DAction {
        pose: Pose,
        relative_pose: Option<Pose>,
        dest_name: Option<String>,
        context: Option<serde_json::Value>,
        /// Seconds; negative means infinite, per §5.
        timeout: f64,
    },
    PointToAction {
        point: super::Point,
        source_link: String,
        context: Option<serde_json::Value>,
    },
    CommandAction {
        commands: Vec<serde_json::Value>,
    },
}

impl RobotAction {
    pub fn solve_by_type(&self) -> SolveByType {
        match self {
            RobotAction::NullAction => SolveByType::Null,
            RobotAction::InitRobot => SolveByType::InitRobot,
            RobotAction::FkAction { .. } => SolveByType::Fk,
            RobotAction::IkAction { .. } => SolveByType::Ik,
            RobotAction::Nav3DAction { .. } => SolveByType::Nav3D,
            RobotAction::PointToAction { .. } => SolveByType::PointTo,
            RobotAction::CommandAction { .. } => SolveByType::Command,
        }
    }

    pub fn ik(goal: Pose, source_links: Vec<String>) -> Self {
        RobotAction::IkAction {
            goal,
            source_links,
            fixed_shape: None,
            context: None,
            start_posture: None,
            end_posture: None,
            posture_rate: None,
        }
    }

    pub fn nav3d(pose: Pose, timeout: f64) -> Self {
        RobotAction::Nav3DAction {
            pose,
            relative_pose: None,
            dest_name: None,
            context: None,
            timeout,
        }
    }
}

/// A per-step bundle of commands fanned out to multiple adapters, robot-id
/// keyed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedRobotAction {
    pub task: String,
    pub actions: HashMap<String, Vec<RobotAction>>,
}

impl CombinedRobotAction {
    pub fn new(task: impl Into<String>) -> Self {
        CombinedRobotAction {
            task: task.into(),
            actions: HashMap::new(),
        }
    }

    pub fn with_action(mut self, robot_id: impl Into<String>, action: RobotAction) -> Self {
        self.actions
            .entry(robot_id.into())
            .or_default()
            .push(action);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.values().all(|v| v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_by_type_matches_variant() {
        assert_eq!(RobotAction::NullAction.solve_by_type(), SolveByType::Null);
        assert_eq!(
            RobotAction::ik(Pose::identity(), vec!["wrist".into()]).solve_by_type(),
            SolveByType::Ik
        );
    }

    #[test]
    fn builder_groups_actions_by_robot() {
        let combined = CombinedRobotAction::new("grasp")
            .with_action("arm_left", RobotAction::InitRobot)
            .with_action("arm_left", RobotAction::NullAction);
        assert_eq!(combined.actions["arm_left"].len(), 2);
    }
}
