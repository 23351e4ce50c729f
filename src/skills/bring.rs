//! `BRING`: moves the focused end-effector either to its model's `bring`
//! posture (`FROM_CONTEXT` mode) or along a straight Cartesian line to a
//! caller-given destination (`COORDINATE_DESTINATION` mode), holding,
//! targeting, or ignoring orientation per `orientation_mode`.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, ContactAnnotation, Point, Pose, Quaternion, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

const DEFAULT_SEGMENTS: u32 = 5;
const TASK_BRING: &str = "bring";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    FromContext,
    Coordinate,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::FromContext
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrientationMode {
    Hold,
    Any,
    Target,
}

impl Default for OrientationMode {
    fn default() -> Self {
        OrientationMode::Hold
    }
}

fn parse_mode(value: Option<&Value>) -> Mode {
    match value.and_then(Value::as_str) {
        Some("coordinate") | Some("COORDINATE_DESTINATION") => Mode::Coordinate,
        _ => Mode::FromContext,
    }
}

fn parse_orientation_mode(value: Option<&Value>) -> OrientationMode {
    match value.and_then(Value::as_str) {
        Some("any") | Some("ANY") => OrientationMode::Any,
        Some("target") | Some("TARGET") => OrientationMode::Target,
        _ => OrientationMode::Hold,
    }
}

fn parse_point(value: &Value) -> Option<Point> {
    Some(Point::new(value.get("x")?.as_f64()?, value.get("y")?.as_f64()?, value.get("z")?.as_f64()?))
}

fn parse_quaternion(value: &Value) -> Quaternion {
    Quaternion::new(
        value.get("x").and_then(Value::as_f64).unwrap_or(0.0),
        value.get("y").and_then(Value::as_f64).unwrap_or(0.0),
        value.get("z").and_then(Value::as_f64).unwrap_or(0.0),
        value.get("w").and_then(Value::as_f64).unwrap_or(1.0),
    )
}

#[derive(Default)]
pub struct BringDecoder {
    robot_id: String,
    mode: Mode,
    destination: Option<Point>,
    orientation_mode: OrientationMode,
    target_orientation: Quaternion,
    num_segments: u32,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for BringDecoder {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.mode = parse_mode(params.get("mode"));
        self.orientation_mode = parse_orientation_mode(params.get("orientation_mode"));
        self.target_orientation = params
            .get("orientation")
            .map(|raw| super::resolve_value(board, raw))
            .map(|v| parse_quaternion(&v))
            .unwrap_or(Quaternion::IDENTITY);
        self.num_segments = params.get("num_segments").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(DEFAULT_SEGMENTS);

        if self.mode == Mode::Coordinate {
            let destination = params.get("destination").map(|raw| super::resolve_value(board, raw));
            self.destination = destination.as_ref().and_then(parse_point);
            if self.destination.is_none() {
                return Status::failed("bring: COORDINATE_DESTINATION mode requires a resolvable 'destination'");
            }
        }
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        env: &ExecutionContext,
        _pipeline: &EnginePipeline,
    ) -> Status {
        if self.robot_id.is_empty() {
            self.robot_id = match &env.focus_end_effector {
                Some(id) => id.clone(),
                None => return Status::failed("bring: no end-effector in focus and no robot_id given"),
            };
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "mode": match self.mode { Mode::FromContext => "from_context", Mode::Coordinate => "coordinate" },
            "destination": self.destination.map(|p| serde_json::json!({"x": p.x, "y": p.y, "z": p.z})),
            "orientation_mode": match self.orientation_mode {
                OrientationMode::Hold => "hold",
                OrientationMode::Any => "any",
                OrientationMode::Target => "target",
            },
            "orientation": {"x": self.target_orientation.x, "y": self.target_orientation.y, "z": self.target_orientation.z, "w": self.target_orientation.w},
            "num_segments": self.num_segments,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct BringSkill {
    robot_id: String,
    steps: VecDeque<CombinedRobotAction>,
    current: Option<CombinedRobotAction>,
}

#[async_trait]
impl Skill for BringSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if self.robot_id.is_empty() {
            return Status::failed("bring: no robot_id resolved");
        }
        let mode = parse_mode(params.get("mode"));

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("bring: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&self.robot_id).cloned() else {
            return Status::failed(format!("bring: no known state for robot '{}'", self.robot_id));
        };
        self.steps.clear();

        match mode {
            Mode::FromContext => {
                let Some(kinematics) = pipeline.kinematics() else {
                    return Status::unexpected("bring: no kinematics engine attached");
                };
                let Some(model) = kinematics.registry.entries.get(&self.robot_id).and_then(|e| e.model.clone()) else {
                    return Status::failed(format!("bring: robot '{}' has no model_robot attached", self.robot_id));
                };
                let goal = match model.configuration_for_task(TASK_BRING, params, &current).await {
                    Ok(state) => state,
                    Err(e) => return Status::failed(format!("bring: configuration_for_task failed: {}", e)),
                };
                self.steps.push_back(
                    CombinedRobotAction::new(TASK_BRING).with_action(self.robot_id.clone(), RobotAction::FkAction { goal }),
                );
            }
            Mode::Coordinate => {
                let Some(destination) = params.get("destination").and_then(parse_point) else {
                    return Status::failed("bring: config carries no 'destination' point");
                };
                let orientation_mode = parse_orientation_mode(params.get("orientation_mode"));
                let start_pose = current.contact_pose(&ContactAnnotation::center()).unwrap_or_else(|_| current.base_pose());
                let target_orientation = match orientation_mode {
                    OrientationMode::Hold | OrientationMode::Any => start_pose.orientation,
                    OrientationMode::Target => params.get("orientation").map(parse_quaternion).unwrap_or(start_pose.orientation),
                };

                let num_segments = params.get("num_segments").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(DEFAULT_SEGMENTS).max(1);
                for i in 1..=num_segments {
                    let t = i as f64 / num_segments as f64;
                    let position = start_pose.position.add(&destination.sub(&start_pose.position).scale(t));
                    let orientation = if orientation_mode == OrientationMode::Any {
                        start_pose.orientation
                    } else {
                        start_pose.orientation.slerp(&target_orientation, t)
                    };
                    self.steps.push_back(CombinedRobotAction::new(TASK_BRING).with_action(
                        self.robot_id.clone(),
                        RobotAction::IkAction {
                            goal: Pose::new(position, orientation),
                            source_links: vec![ContactAnnotation::center().0],
                            fixed_shape: None,
                            context: None,
                            start_posture: None,
                            end_posture: None,
                            posture_rate: None,
                        },
                    ));
                }
            }
        }
        self.current = None;
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        self.current = self.steps.pop_front();
        serde_json::json!({ "terminate": self.current.is_none() })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.current.clone().unwrap_or_else(|| CombinedRobotAction::new(TASK_BRING))
    }

    fn interruptible(&self) -> bool {
        true
    }
}
