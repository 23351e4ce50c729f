//! `RELEASE`: opens the gripper over `num_release_segments` while holding
//! the current end-effector pose fixed, then departs `DEPART_DISTANCE_M`
//! along `depart_direction` (rotated into the world frame) over
//! `num_depart_segments`.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, ContactAnnotation, JointState, Point, Pose, RobotAction, RobotState, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

/// Distance (meters) departed along `depart_direction` after releasing.
const DEPART_DISTANCE_M: f64 = 0.15;
const DEFAULT_RELEASE_SEGMENTS: u32 = 3;
const DEFAULT_DEPART_SEGMENTS: u32 = 5;
const TASK_RELEASE: &str = "release";
const DEFAULT_RELEASE_TASK: &str = "release_open";

fn parse_direction(value: Option<&Value>) -> (f64, f64, f64) {
    match value {
        Some(v) => (
            v.get("x").and_then(Value::as_f64).unwrap_or(0.0),
            v.get("y").and_then(Value::as_f64).unwrap_or(0.0),
            v.get("z").and_then(Value::as_f64).unwrap_or(1.0),
        ),
        None => (0.0, 0.0, 1.0),
    }
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

#[derive(Default)]
pub struct ReleaseDecoder {
    robot_id: String,
    depart_direction: (f64, f64, f64),
    num_release_segments: u32,
    num_depart_segments: u32,
    release_task: String,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for ReleaseDecoder {
    async fn decode(&mut self, params: &Value, _board: &Blackboard) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.depart_direction = parse_direction(params.get("depart_direction"));
        self.num_release_segments = params
            .get("num_release_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_RELEASE_SEGMENTS);
        self.num_depart_segments = params
            .get("num_depart_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_DEPART_SEGMENTS);
        self.release_task = params
            .get("release_task")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RELEASE_TASK)
            .to_string();
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
                None => return Status::failed("release: no end-effector in focus and no robot_id given"),
            };
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "depart_direction": {"x": self.depart_direction.0, "y": self.depart_direction.1, "z": self.depart_direction.2},
            "num_release_segments": self.num_release_segments,
            "num_depart_segments": self.num_depart_segments,
            "release_task": self.release_task,
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct ReleaseSkill {
    robot_id: String,
    steps: VecDeque<CombinedRobotAction>,
    current: Option<CombinedRobotAction>,
}

#[async_trait]
impl Skill for ReleaseSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if self.robot_id.is_empty() {
            return Status::failed("release: no robot_id resolved");
        }
        let direction = parse_direction(params.get("depart_direction"));
        let num_release_segments = params
            .get("num_release_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_RELEASE_SEGMENTS);
        let num_depart_segments = params
            .get("num_depart_segments")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_DEPART_SEGMENTS)
            .max(1);
        let release_task = params.get("release_task").and_then(Value::as_str).unwrap_or(DEFAULT_RELEASE_TASK);

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("release: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&self.robot_id).cloned() else {
            return Status::failed(format!("release: no known state for robot '{}'", self.robot_id));
        };
        let hold_pose = current.contact_pose(&ContactAnnotation::center()).unwrap_or_else(|_| current.base_pose());

        let Some(model) = pipeline
            .kinematics()
            .and_then(|k| k.registry.entries.get(&self.robot_id))
            .and_then(|e| e.model.clone())
        else {
            return Status::failed(format!("release: robot '{}' has no model_robot attached", self.robot_id));
        };
        let open_state = match model.configuration_for_task(release_task, params, &current).await {
            Ok(s) => s,
            Err(e) => return Status::failed(format!("release: configuration_for_task failed: {}", e)),
        };

        self.steps.clear();
        for i in 1..=num_release_segments.max(1) {
            let t = i as f64 / num_release_segments.max(1) as f64;
            let shape = interpolate_shape(&current, &open_state, t);
            self.steps.push_back(CombinedRobotAction::new(TASK_RELEASE).with_action(
                self.robot_id.clone(),
                RobotAction::IkAction {
                    goal: hold_pose,
                    source_links: vec![ContactAnnotation::center().0],
                    fixed_shape: Some(shape),
                    context: None,
                    start_posture: None,
                    end_posture: None,
                    posture_rate: Some(1.0),
                },
            ));
        }

        let world_direction = current.base_pose().orientation.rotate_vector(direction);
        for i in 1..=num_depart_segments {
            let t = (i as f64 / num_depart_segments as f64) * DEPART_DISTANCE_M;
            let position = hold_pose.position.add(&Point::from(world_direction).scale(t));
            self.steps.push_back(CombinedRobotAction::new(TASK_RELEASE).with_action(
                self.robot_id.clone(),
                RobotAction::IkAction {
                    goal: Pose::new(position, hold_pose.orientation),
                    source_links: vec![ContactAnnotation::center().0],
                    fixed_shape: Some(open_state.clone()),
                    context: None,
                    start_posture: None,
                    end_posture: None,
                    posture_rate: Some(1.0),
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
        self.current.clone().unwrap_or_else(|| CombinedRobotAction::new(TASK_RELEASE))
    }

    fn interruptible(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointState;

    #[test]
    fn interpolate_shape_blends_positions_linearly() {
        let a = RobotState::EndEffector {
            joints: JointState::new(vec![0.0, 0.0], vec!["f1".into(), "f2".into()]).unwrap(),
            parent_link: String::new(),
            base_pose: Pose::identity(),
            contacts: Default::default(),
        };
        let b = RobotState::EndEffector {
            joints: JointState::new(vec![1.0, 1.0], vec!["f1".into(), "f2".into()]).unwrap(),
            parent_link: String::new(),
            base_pose: Pose::identity(),
            contacts: Default::default(),
        };
        let mid = interpolate_shape(&a, &b, 0.5);
        assert_eq!(mid.joints().unwrap().positions, vec![0.5, 0.5]);
    }
}
