//! `GRASP`: selects the focus end-effector, looks up preshape/grasp
//! postures, and drives a preshape-then-close approach trajectory.
//!
//! Initiation sends the preshape plus a pre-grasp IK goal offset
//! `APPROACH_OFFSET_M` back along the approach direction; post-initiation
//! builds the approach-then-close step list consumed by `get_action`/
//! `format_action`.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, ContactAnnotation, JointState, Point, Pose, Quaternion, RobotAction, RobotState, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

/// Distance (meters) back along the approach direction the pre-grasp IK
/// goal is offset from the grasp target.
const APPROACH_OFFSET_M: f64 = 0.15;
const DEFAULT_APPROACH_SEGMENTS: u32 = 5;
const DEFAULT_GRASP_SEGMENTS: u32 = 3;
const TASK_GRASP: &str = "grasp";
const TASK_PRESHAPE: &str = "grasp_preshape";
const TASK_CLOSE: &str = "grasp_close";

fn parse_pose(value: &Value) -> Option<Pose> {
    if let Value::Array(_) = value {
        let (x, y, z) = super::parse_xyz_point(value)?;
        return Some(Pose::new(Point::new(x, y, z), Quaternion::IDENTITY));
    }
    let pos = value.get("position")?;
    let (x, y, z) = super::parse_xyz_point(pos)?;
    let position = Point::new(x, y, z);
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

fn parse_direction(value: Option<&Value>) -> (f64, f64, f64) {
    super::parse_xyz_or(value, (0.0, 0.0, 1.0))
}

fn lerp_point(a: Point, b: Point, t: f64) -> Point {
    a.add(&b.sub(&a).scale(t))
}

fn interpolate_shape(a: &RobotState, b: &RobotState, t: f64) -> RobotState {
    match (a.joints(), b.joints()) {
        (Some(ja), Some(jb)) if ja.positions.len() == jb.positions.len() => {
            let positions = ja
                .positions
                .iter()
                .zip(jb.positions.iter())
                .map(|(pa, pb)| pa + (pb - pa) * t)
                .collect();
            RobotState::EndEffector {
                joints: JointState::new(positions, ja.names.clone()).unwrap_or_else(|_| jb.clone()),
                parent_link: String::new(),
                base_pose: b.base_pose(),
                contacts: Default::default(),
            }
        }
        _ => b.clone(),
    }
}

#[derive(Default, Clone)]
pub struct GraspDecoder {
    robot_id: String,
    goal: Pose,
    approach_direction: (f64, f64, f64),
    num_approach_segments: u32,
    num_grasp_segments: u32,
    posture_rate: f64,
    preshape_task: String,
    grasp_task: String,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for GraspDecoder {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let target = params.get("target").map(|raw| super::resolve_value(board, raw));
        self.goal = match target.as_ref().and_then(parse_pose) {
            Some(pose) => pose,
            None => return Status::failed("grasp: no resolvable 'target' pose"),
        };
        self.approach_direction = parse_direction(params.get("approach_direction"));
        self.num_approach_segments = params
            .get("num_approach_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_APPROACH_SEGMENTS);
        self.num_grasp_segments = params
            .get("num_grasp_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_GRASP_SEGMENTS);
        self.posture_rate = params.get("posture_rate").and_then(Value::as_f64).unwrap_or(1.0);
        self.preshape_task = params
            .get("preshape_task")
            .and_then(Value::as_str)
            .unwrap_or(TASK_PRESHAPE)
            .to_string();
        self.grasp_task = params
            .get("grasp_task")
            .and_then(Value::as_str)
            .unwrap_or(TASK_CLOSE)
            .to_string();
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        _env: &ExecutionContext,
        _pipeline: &EnginePipeline,
    ) -> Status {
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "goal": {
                "position": {"x": self.goal.position.x, "y": self.goal.position.y, "z": self.goal.position.z},
                "orientation": {"x": self.goal.orientation.x, "y": self.goal.orientation.y, "z": self.goal.orientation.z, "w": self.goal.orientation.w},
            },
            "approach_direction": {"x": self.approach_direction.0, "y": self.approach_direction.1, "z": self.approach_direction.2},
            "num_approach_segments": self.num_approach_segments,
            "num_grasp_segments": self.num_grasp_segments,
            "posture_rate": self.posture_rate,
            "preshape_task": self.preshape_task,
            "grasp_task": self.grasp_task,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct GraspSkill {
    robot_id: String,
    goal: Pose,
    approach_direction: (f64, f64, f64),
    num_approach_segments: u32,
    num_grasp_segments: u32,
    posture_rate: f64,
    preshape_task: String,
    grasp_task: String,
    preshape_state: Option<RobotState>,
    grasp_state: Option<RobotState>,
    approach_start: Point,
    translated_orientation: Quaternion,
    initiation_action: Option<CombinedRobotAction>,
    steps: VecDeque<CombinedRobotAction>,
    current: Option<CombinedRobotAction>,
}

#[async_trait]
impl Skill for GraspSkill {
    async fn init(&mut self, env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        let Some(goal) = params.get("goal").and_then(parse_pose) else {
            return Status::failed("grasp: config carries no 'goal' pose");
        };
        self.goal = goal;
        self.approach_direction = parse_direction(params.get("approach_direction"));
        self.num_approach_segments = params
            .get("num_approach_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_APPROACH_SEGMENTS)
            .max(1);
        self.num_grasp_segments = params
            .get("num_grasp_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_GRASP_SEGMENTS);
        self.posture_rate = params.get("posture_rate").and_then(Value::as_f64).unwrap_or(1.0);
        self.preshape_task = params.get("preshape_task").and_then(Value::as_str).unwrap_or(TASK_PRESHAPE).to_string();
        self.grasp_task = params.get("grasp_task").and_then(Value::as_str).unwrap_or(TASK_CLOSE).to_string();

        let requested_robot = params.get("robot_id").and_then(Value::as_str).unwrap_or_default();
        let combiner = match super::combiner_or_failed(pipeline) {
            Ok(c) => c,
            Err(status) => return status,
        };
        let robot_id = if requested_robot.is_empty() {
            let Some(kinematics) = pipeline.kinematics() else {
                return Status::unexpected("grasp: no kinematics engine attached");
            };
            match kinematics.select_end_effector(TASK_GRASP, params, combiner.as_ref()).await {
                Ok(id) => id,
                Err(e) => return Status::failed(format!("grasp: end-effector focus selection failed: {}", e)),
            }
        } else {
            requested_robot.to_string()
        };
        env.focus_end_effector = Some(robot_id.clone());
        self.robot_id = robot_id.clone();

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("grasp: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&robot_id).cloned() else {
            return Status::failed(format!("grasp: no known state for robot '{}'", robot_id));
        };

        let Some(model) = pipeline
            .kinematics()
            .and_then(|k| k.registry.entries.get(&robot_id))
            .and_then(|e| e.model.clone())
        else {
            return Status::failed(format!("grasp: robot '{}' has no model_robot attached", robot_id));
        };
        self.preshape_state = match model.configuration_for_task(&self.preshape_task, params, &current).await {
            Ok(s) => Some(s),
            Err(e) => return Status::failed(format!("grasp: preshape configuration_for_task failed: {}", e)),
        };
        self.grasp_state = match model.configuration_for_task(&self.grasp_task, params, &current).await {
            Ok(s) => Some(s),
            Err(e) => return Status::failed(format!("grasp: close configuration_for_task failed: {}", e)),
        };

        let Some(kinematics) = pipeline.kinematics_mut() else {
            return Status::unexpected("grasp: no kinematics engine attached");
        };
        if let Err(e) = kinematics.generate_orientation_transform_pair(&robot_id, params).await {
            return Status::failed(format!("grasp: generate_orientation_transform_pair failed: {}", e));
        }
        let base_orientation = current.base_pose().orientation;
        let control_link = ContactAnnotation::center().0;
        let annotation = ContactAnnotation::center();
        self.translated_orientation = match kinematics
            .get_orientation_transform(&robot_id, &control_link, &annotation, self.goal.orientation, base_orientation)
            .await
        {
            Ok(q) => q,
            Err(e) => return Status::failed(format!("grasp: get_orientation_transform failed: {}", e)),
        };

        let world_approach = base_orientation.rotate_vector(self.approach_direction);
        self.approach_start = self.goal.position.sub(&Point::from(world_approach).scale(APPROACH_OFFSET_M));

        self.initiation_action = Some(
            CombinedRobotAction::new("grasp").with_action(
                robot_id,
                RobotAction::IkAction {
                    goal: Pose::new(self.approach_start, self.translated_orientation),
                    source_links: vec![control_link],
                    fixed_shape: self.preshape_state.clone(),
                    context: None,
                    start_posture: None,
                    end_posture: None,
                    posture_rate: Some(1.0),
                },
            ),
        );
        self.steps.clear();
        self.current = None;
        Status::success()
    }

    async fn any_initiation_action(&mut self, _env: &ExecutionContext, _pipeline: &EnginePipeline) -> Option<CombinedRobotAction> {
        self.initiation_action.clone()
    }

    async fn any_post_initiation(&mut self, _env: &mut ExecutionContext, _pipeline: &mut EnginePipeline) -> Status {
        let (Some(preshape), Some(grasp)) = (self.preshape_state.clone(), self.grasp_state.clone()) else {
            return Status::unexpected("grasp: missing preshape/grasp posture");
        };

        let rate = self.posture_rate.clamp(0.0, 1.0);
        if (rate - self.posture_rate).abs() > f64::EPSILON {
            log::warn!(
                "grasp: posture_rate {} out of [0, 1], clamped to {}",
                self.posture_rate,
                rate
            );
            self.posture_rate = rate;
        }

        for i in 1..=self.num_approach_segments {
            let t = i as f64 / self.num_approach_segments as f64;
            let position = lerp_point(self.approach_start, self.goal.position, t);
            let shape_t = if self.num_approach_segments == 1 { 1.0 } else { t * self.posture_rate };
            let shape = interpolate_shape(&preshape, &grasp, shape_t);
            self.steps.push_back(CombinedRobotAction::new("grasp").with_action(
                self.robot_id.clone(),
                RobotAction::IkAction {
                    goal: Pose::new(position, self.translated_orientation),
                    source_links: vec![ContactAnnotation::center().0],
                    fixed_shape: Some(shape),
                    context: None,
                    start_posture: None,
                    end_posture: None,
                    posture_rate: Some(self.posture_rate),
                },
            ));
        }
        for _ in 0..self.num_grasp_segments {
            self.steps.push_back(CombinedRobotAction::new("grasp").with_action(
                self.robot_id.clone(),
                RobotAction::IkAction {
                    goal: Pose::new(self.goal.position, self.translated_orientation),
                    source_links: vec![ContactAnnotation::center().0],
                    fixed_shape: Some(grasp.clone()),
                    context: None,
                    start_posture: None,
                    end_posture: None,
                    posture_rate: Some(1.0),
                },
            ));
        }
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        self.current = self.steps.pop_front();
        serde_json::json!({ "terminate": self.current.is_none() })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.current.clone().unwrap_or_else(|| CombinedRobotAction::new("grasp"))
    }

    fn interruptible(&self) -> bool {
        true
    }
}
