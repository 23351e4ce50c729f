//! `NAVIGATION`: drives the mobile base via `sendBasePose`. Four
//! destination modes: a named map point (`POINT_ON_MAP`), a relative
//! offset in the current base frame, an absolute map pose, or an offset
//! relative to a visually detected target resolved through the
//! combiner's `task_transform("navigation", ...)`.
//!
//! Before dispatching, checks whether the computed goal is already within
//! tolerance of the current base pose and if so emits `NullAction`
//! instead of navigating.

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, Pose, Quaternion, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

const DEFAULT_STAY_POSITION_TOLERANCE_M: f64 = 0.05;
const DEFAULT_STAY_ORIENTATION_TOLERANCE_RAD: f64 = 0.0873;
/// Negative means infinite, per the base pose dispatch contract.
const DEFAULT_TIMEOUT_S: f64 = -1.0;
const TASK_NAVIGATION: &str = "navigation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PointOnMap,
    Relative,
    Absolute,
    RelativeToTarget,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Absolute
    }
}

fn parse_mode(value: Option<&Value>) -> Mode {
    match value.and_then(Value::as_str) {
        Some("point_on_map") | Some("POINT_ON_MAP") => Mode::PointOnMap,
        Some("relative") | Some("RELATIVE") => Mode::Relative,
        Some("relative_to_target") | Some("RELATIVE_TO_TARGET") => Mode::RelativeToTarget,
        _ => Mode::Absolute,
    }
}

fn mode_str(mode: Mode) -> &'static str {
    match mode {
        Mode::PointOnMap => "point_on_map",
        Mode::Relative => "relative",
        Mode::Absolute => "absolute",
        Mode::RelativeToTarget => "relative_to_target",
    }
}

fn parse_pose(value: &Value) -> Option<Pose> {
    if let Value::Array(_) = value {
        let (x, y, z) = super::parse_xyz_point(value)?;
        return Some(Pose::new(crate::model::Point::new(x, y, z), Quaternion::IDENTITY));
    }
    let pos = value.get("position")?;
    let (x, y, z) = super::parse_xyz_point(pos)?;
    let position = crate::model::Point::new(x, y, z);
    let orientation = match value.get("orientation") {
        Some(o) => Quaternion::new(
            o.get("x").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("y").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("z").and_then(Value::as_f64).unwrap_or(0.0),
            o.get("w").and_then(Value::as_f64).unwrap_or(1.0),
        ),
        None => Quaternion::IDENTITY,
    };
    Some(Pose::new(position, orientation))
}

fn pose_to_value(pose: Pose) -> Value {
    serde_json::json!({
        "position": {"x": pose.position.x, "y": pose.position.y, "z": pose.position.z},
        "orientation": {"x": pose.orientation.x, "y": pose.orientation.y, "z": pose.orientation.z, "w": pose.orientation.w},
    })
}

/// Whether `goal` is close enough to `current` that navigating there would
/// be a no-op: position within `position_tolerance` (optionally ignoring
/// the Z axis) and orientation within `orientation_tolerance` radians.
fn within_stay_tolerance(current: Pose, goal: Pose, position_tolerance: f64, orientation_tolerance: f64, ignore_z: bool) -> bool {
    let mut offset = goal.position.sub(&current.position);
    if ignore_z {
        offset.z = 0.0;
    }
    if offset.norm() > position_tolerance {
        return false;
    }

    let dot = (current.orientation.x * goal.orientation.x
        + current.orientation.y * goal.orientation.y
        + current.orientation.z * goal.orientation.z
        + current.orientation.w * goal.orientation.w)
        .abs()
        .min(1.0);
    let angle = 2.0 * dot.acos();
    angle <= orientation_tolerance
}

#[derive(Default)]
pub struct NavigationDecoder {
    robot_id: String,
    mode: Mode,
    dest_name: String,
    destination: Option<Pose>,
    navigation_2d: bool,
    stay_position_tolerance: f64,
    stay_orientation_tolerance: f64,
    timeout: f64,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for NavigationDecoder {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.mode = parse_mode(params.get("mode"));
        self.dest_name = params.get("dest_name").and_then(Value::as_str).unwrap_or_default().to_string();
        self.destination = params.get("destination").map(|raw| super::resolve_value(board, raw)).as_ref().and_then(parse_pose);
        self.navigation_2d = params.get("navigation_2d").and_then(Value::as_bool).unwrap_or(false);
        self.stay_position_tolerance = params
            .get("stay_position_tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_STAY_POSITION_TOLERANCE_M);
        self.stay_orientation_tolerance = params
            .get("stay_orientation_tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_STAY_ORIENTATION_TOLERANCE_RAD);
        self.timeout = params.get("timeout").and_then(Value::as_f64).unwrap_or(DEFAULT_TIMEOUT_S);

        match self.mode {
            Mode::PointOnMap if self.dest_name.is_empty() => {
                return Status::failed("navigation: POINT_ON_MAP mode requires a 'dest_name'");
            }
            Mode::Relative | Mode::Absolute if self.destination.is_none() => {
                return Status::failed("navigation: mode requires a resolvable 'destination' pose");
            }
            _ => {}
        }
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        _env: &ExecutionContext,
        pipeline: &EnginePipeline,
    ) -> Status {
        if self.robot_id.is_empty() {
            let Some(kinematics) = pipeline.kinematics() else {
                return Status::unexpected("navigation: no kinematics engine attached");
            };
            self.robot_id = kinematics.registry.base_id.clone();
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "mode": mode_str(self.mode),
            "dest_name": self.dest_name,
            "destination": self.destination.map(pose_to_value),
            "navigation_2d": self.navigation_2d,
            "stay_position_tolerance": self.stay_position_tolerance,
            "stay_orientation_tolerance": self.stay_orientation_tolerance,
            "timeout": self.timeout,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct NavigationSkill {
    action: Option<CombinedRobotAction>,
    done: bool,
}

#[async_trait]
impl Skill for NavigationSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.done = false;
        let robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if robot_id.is_empty() {
            return Status::failed("navigation: no robot_id resolved");
        }
        let mode = parse_mode(params.get("mode"));
        let navigation_2d = params.get("navigation_2d").and_then(Value::as_bool).unwrap_or(false);
        let stay_position_tolerance = params
            .get("stay_position_tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_STAY_POSITION_TOLERANCE_M);
        let stay_orientation_tolerance = params
            .get("stay_orientation_tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_STAY_ORIENTATION_TOLERANCE_RAD);
        let timeout = params.get("timeout").and_then(Value::as_f64).unwrap_or(DEFAULT_TIMEOUT_S);

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("navigation: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&robot_id) else {
            return Status::failed(format!("navigation: no known state for robot '{}'", robot_id));
        };
        let current_pose = current.base_pose();

        if mode == Mode::PointOnMap {
            let dest_name = params.get("dest_name").and_then(Value::as_str).unwrap_or_default().to_string();
            self.action = Some(CombinedRobotAction::new(TASK_NAVIGATION).with_action(
                robot_id,
                RobotAction::Nav3DAction {
                    pose: Pose::identity(),
                    relative_pose: None,
                    dest_name: Some(dest_name),
                    context: None,
                    timeout,
                },
            ));
            return Status::success();
        }

        let (goal, relative_pose) = match mode {
            Mode::Relative => {
                let Some(offset) = params.get("destination").and_then(parse_pose) else {
                    return Status::failed("navigation: config carries no 'destination' offset");
                };
                let world_offset = current_pose.orientation.rotate_vector(offset.position.as_tuple());
                let goal = Pose::new(
                    current_pose.position.add(&crate::model::Point::from(world_offset)),
                    current_pose.orientation.mul(&offset.orientation),
                );
                (goal, Some(offset))
            }
            Mode::Absolute => {
                let Some(goal) = params.get("destination").and_then(parse_pose) else {
                    return Status::failed("navigation: config carries no 'destination' pose");
                };
                (goal, None)
            }
            Mode::RelativeToTarget => {
                let combiner = match super::combiner_or_failed(pipeline) {
                    Ok(c) => c,
                    Err(status) => return status,
                };
                let transforms = match combiner.task_transform(TASK_NAVIGATION, params, &latest).await {
                    Ok(t) => t,
                    Err(e) => return Status::failed(format!("navigation: task_transform failed: {}", e)),
                };
                let Some(per_robot) = transforms.get(&robot_id) else {
                    return Status::failed(format!("navigation: no task_transform entry for robot '{}'", robot_id));
                };
                let Some(absolute) = per_robot.get("absolute").copied() else {
                    return Status::failed("navigation: task_transform carries no 'absolute' pose");
                };
                (absolute, per_robot.get("relative").copied())
            }
            Mode::PointOnMap => unreachable!("handled above"),
        };

        if within_stay_tolerance(current_pose, goal, stay_position_tolerance, stay_orientation_tolerance, navigation_2d) {
            self.action = Some(CombinedRobotAction::new(TASK_NAVIGATION).with_action(robot_id, RobotAction::NullAction));
            return Status::success();
        }

        self.action = Some(CombinedRobotAction::new(TASK_NAVIGATION).with_action(
            robot_id,
            RobotAction::Nav3DAction {
                pose: goal,
                relative_pose,
                dest_name: None,
                context: None,
                timeout,
            },
        ));
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        let terminate = self.done;
        self.done = true;
        serde_json::json!({ "terminate": terminate })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.action.clone().unwrap_or_else(|| CombinedRobotAction::new(TASK_NAVIGATION))
    }

    fn interruptible(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;

    #[test]
    fn stay_tolerance_ignores_z_when_2d() {
        let current = Pose::identity();
        let goal = Pose::new(Point::new(0.0, 0.0, 5.0), Quaternion::IDENTITY);
        assert!(within_stay_tolerance(current, goal, 0.05, 0.05, true));
        assert!(!within_stay_tolerance(current, goal, 0.05, 0.05, false));
    }

    #[test]
    fn stay_tolerance_rejects_large_position_offset() {
        let current = Pose::identity();
        let goal = Pose::new(Point::new(1.0, 0.0, 0.0), Quaternion::IDENTITY);
        assert!(!within_stay_tolerance(current, goal, 0.05, 0.1, false));
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [Mode::PointOnMap, Mode::Relative, Mode::Absolute, Mode::RelativeToTarget] {
            assert_eq!(parse_mode(Some(&Value::String(mode_str(mode).to_string()))), mode);
        }
    }
}
