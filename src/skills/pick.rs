//! `PICK`: a straight-line Cartesian lift by `detach_direction` (rotated
//! into the world frame by the robot's current base orientation; its
//! magnitude is the lift displacement), holding orientation fixed, over
//! `ceil(distance_m / LIFT_SEGMENT_SIZE_M)` steps.
//!
//! `interruptible` defaults to `true` but can be pinned to `false` via
//! config, e.g. for a rig where a mid-lift cancel must not abandon the
//! object.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, ContactAnnotation, Pose, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

/// Cartesian step size (meters) the lift trajectory is chunked into.
const LIFT_SEGMENT_SIZE_M: f64 = 0.05;
const DEFAULT_LIFT_DISTANCE_M: f64 = 0.1;
const TASK_PICK: &str = "pick";

fn parse_direction(value: Option<&Value>) -> (f64, f64, f64) {
    super::parse_xyz_or(value, (0.0, 0.0, 1.0))
}

#[derive(Default)]
pub struct PickDecoder {
    robot_id: String,
    detach_direction: (f64, f64, f64),
    distance_m: f64,
    interruptible: bool,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for PickDecoder {
    async fn decode(&mut self, params: &Value, _board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.detach_direction = parse_direction(params.get("detach_direction"));
        self.distance_m = params.get("distance_m").and_then(Value::as_f64).unwrap_or(DEFAULT_LIFT_DISTANCE_M);
        self.interruptible = params.get("interruptible").and_then(Value::as_bool).unwrap_or(true);
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
                None => return Status::failed("pick: no end-effector in focus and no robot_id given"),
            };
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "detach_direction": {"x": self.detach_direction.0, "y": self.detach_direction.1, "z": self.detach_direction.2},
            "distance_m": self.distance_m,
            "interruptible": self.interruptible,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct PickSkill {
    robot_id: String,
    steps: VecDeque<CombinedRobotAction>,
    current: Option<CombinedRobotAction>,
    interruptible: bool,
}

#[async_trait]
impl Skill for PickSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if self.robot_id.is_empty() {
            return Status::failed("pick: no robot_id resolved");
        }
        self.interruptible = params.get("interruptible").and_then(Value::as_bool).unwrap_or(true);
        let direction = parse_direction(params.get("detach_direction"));
        let distance = params.get("distance_m").and_then(Value::as_f64).unwrap_or(DEFAULT_LIFT_DISTANCE_M);

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("pick: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&self.robot_id) else {
            return Status::failed(format!("pick: no known state for robot '{}'", self.robot_id));
        };
        let start_pose = current.contact_pose(&ContactAnnotation::center()).unwrap_or_else(|_| current.base_pose());
        let orientation = start_pose.orientation;
        let world_direction = current.base_pose().orientation.rotate_vector(direction);
        // `detach_direction` carries its own magnitude (e.g. `[0, 0, 0.1]`
        // lifts exactly 0.1m); `distance_m` only drives the segment count.
        let displacement = crate::model::Point::from(world_direction);

        self.steps.clear();
        let num_segments = (distance / LIFT_SEGMENT_SIZE_M).ceil().max(1.0) as u32;
        for i in 1..=num_segments {
            let t = i as f64 / num_segments as f64;
            let position = start_pose.position.add(&displacement.scale(t));
            self.steps.push_back(CombinedRobotAction::new(TASK_PICK).with_action(
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
        self.current = None;
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        self.current = self.steps.pop_front();
        serde_json::json!({ "terminate": self.current.is_none() })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.current.clone().unwrap_or_else(|| CombinedRobotAction::new(TASK_PICK))
    }

    fn interruptible(&self) -> bool {
        self.interruptible
    }
}
