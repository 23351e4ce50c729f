//! `PLACE`: descends along `attach_direction` to a pre-place pose held
//! `PRE_PLACE_HEIGHT_M` above the target plane, then nudges down by
//! `NUDGE_STEP_M` per step, polling the focused force sensor's
//! `SurfaceContact` probe after each nudge, until contact is confirmed or
//! `post_iters` elapse. Sends IK only; the gripper shape is left untouched.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::PhysicalSensor;
use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, ContactAnnotation, Point, Pose, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

/// Height (meters) above the target plane the pre-place pose is held at
/// before nudging down begins.
const PRE_PLACE_HEIGHT_M: f64 = 0.02;
/// Descent (meters) applied per queued nudge step.
const NUDGE_STEP_M: f64 = 0.005;
const DEFAULT_POST_ITERS: u32 = 20;
const SURFACE_CONTACT_CMD: &str = "SurfaceContact";
const TASK_PLACE: &str = "place";

fn parse_direction(value: Option<&Value>) -> (f64, f64, f64) {
    super::parse_xyz_or(value, (0.0, 0.0, -1.0))
}

fn parse_point(value: &Value) -> Option<Point> {
    let (x, y, z) = super::parse_xyz_point(value)?;
    Some(Point::new(x, y, z))
}

#[derive(Default)]
pub struct PlaceDecoder {
    robot_id: String,
    target: Option<Point>,
    attach_direction: (f64, f64, f64),
    post_iters: u32,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for PlaceDecoder {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let target = params.get("target").map(|raw| super::resolve_value(board, raw));
        self.target = match target.as_ref().and_then(parse_point) {
            Some(p) => Some(p),
            None => return Status::failed("place: no resolvable 'target' point"),
        };
        self.attach_direction = parse_direction(params.get("attach_direction"));
        self.post_iters = params.get("post_iters").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(DEFAULT_POST_ITERS);
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
                None => return Status::failed("place: no end-effector in focus and no robot_id given"),
            };
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "target": self.target.map(|p| serde_json::json!({"x": p.x, "y": p.y, "z": p.z})),
            "attach_direction": {"x": self.attach_direction.0, "y": self.attach_direction.1, "z": self.attach_direction.2},
            "post_iters": self.post_iters,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct PlaceSkill {
    robot_id: String,
    pre_place_pose: Option<Pose>,
    sensor: Option<Arc<dyn PhysicalSensor>>,
    position: Point,
    contact_confirmed: bool,
    iterations_used: u32,
    post_iters: u32,
    current: Option<CombinedRobotAction>,
}

#[async_trait]
impl Skill for PlaceSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if self.robot_id.is_empty() {
            return Status::failed("place: no robot_id resolved");
        }
        let Some(target) = params.get("target").and_then(parse_point) else {
            return Status::failed("place: config carries no 'target' point");
        };
        let attach_direction = parse_direction(params.get("attach_direction"));
        self.contact_confirmed = false;
        self.iterations_used = 0;
        self.post_iters = params.get("post_iters").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(DEFAULT_POST_ITERS);
        self.current = None;
        self.sensor = pipeline.sensor(&self.robot_id);

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("place: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&self.robot_id) else {
            return Status::failed(format!("place: no known state for robot '{}'", self.robot_id));
        };
        let orientation = current.contact_pose(&ContactAnnotation::center()).unwrap_or_else(|_| current.base_pose()).orientation;
        let world_direction = current.base_pose().orientation.rotate_vector(attach_direction);

        let pre_place_position = target.sub(&Point::from(world_direction).scale(PRE_PLACE_HEIGHT_M));
        self.pre_place_pose = Some(Pose::new(pre_place_position, orientation));
        self.position = pre_place_position;
        Status::success()
    }

    async fn any_initiation_action(&mut self, _env: &ExecutionContext, _pipeline: &EnginePipeline) -> Option<CombinedRobotAction> {
        let pose = self.pre_place_pose?;
        Some(CombinedRobotAction::new(TASK_PLACE).with_action(
            self.robot_id.clone(),
            RobotAction::IkAction {
                goal: pose,
                source_links: vec![ContactAnnotation::center().0],
                fixed_shape: None,
                context: None,
                start_posture: None,
                end_posture: None,
                posture_rate: None,
            },
        ))
    }

    /// Polls the force sensor once per call and advances the descent by one
    /// nudge only when contact hasn't been confirmed yet, matching the
    /// original's per-iteration `appendTaskSpecificStates`/`getAction`
    /// ordering: the sensor is consulted *between* descent steps, never all
    /// up front.
    async fn get_action(&mut self, _obs: &Value) -> Value {
        if self.contact_confirmed || self.iterations_used >= self.post_iters {
            self.current = None;
            return serde_json::json!({ "terminate": true });
        }

        if let Some(sensor) = &self.sensor {
            let (status, _payload) = sensor.get_physics_state(SURFACE_CONTACT_CMD, &Value::Null).await;
            if status.is_success() {
                self.contact_confirmed = true;
                self.current = None;
                return serde_json::json!({ "terminate": true });
            }
        }

        let Some(pose) = self.pre_place_pose else {
            self.current = None;
            return serde_json::json!({ "terminate": true });
        };
        self.position = self.position.add(&Point::from(pose.orientation.rotate_vector((0.0, 0.0, -1.0))).scale(NUDGE_STEP_M));
        self.iterations_used += 1;
        self.current = Some(CombinedRobotAction::new(TASK_PLACE).with_action(
            self.robot_id.clone(),
            RobotAction::IkAction {
                goal: Pose::new(self.position, pose.orientation),
                source_links: vec![ContactAnnotation::center().0],
                fixed_shape: None,
                context: None,
                start_posture: None,
                end_posture: None,
                posture_rate: None,
            },
        ));
        serde_json::json!({ "terminate": false })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.current.clone().unwrap_or_else(|| CombinedRobotAction::new(TASK_PLACE))
    }

    fn interruptible(&self) -> bool {
        true
    }

    async fn on_finish(
        &mut self,
        _env: &mut ExecutionContext,
        board: &mut Blackboard,
        _pipeline: &EnginePipeline,
    ) -> Option<CombinedRobotAction> {
        if !self.contact_confirmed {
            log::debug!(
                "place: exhausted {} post-initiation iterations without confirmed surface contact",
                self.iterations_used
            );
        }
        board.set("place_contact_confirmed", Value::Bool(self.contact_confirmed));
        None
    }
}
