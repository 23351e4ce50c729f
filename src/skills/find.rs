//! `FIND`: sets camera focus, drives the target robot to its model's
//! `find` posture in one FK step, then on finish asks the combiner which
//! recognition method to use and reads the focused sensor with it,
//! writing `{find_true}`/`{find_result}` to the blackboard.

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::{keys, Blackboard};
use crate::model::{CombinedRobotAction, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

const SENSOR_TYPE_CAMERA_3D: &str = "CAMERA_3D";
const TASK_FIND: &str = "find";

#[derive(Default)]
pub struct FindDecoder {
    robot_id: String,
    params: Value,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for FindDecoder {
    async fn decode(&mut self, params: &Value, _board: &Blackboard) -> Status {
        self.robot_id = params
            .get("robot_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.params = params.clone();
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        _env: &ExecutionContext,
        pipeline: &EnginePipeline,
    ) -> Status {
        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("find: no kinematics engine attached");
        };
        if self.robot_id.is_empty() {
            self.robot_id = kinematics.registry.base_id.clone();
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        let mut config = self.params.clone();
        if let Value::Object(map) = &mut config {
            map.insert("robot_id".to_string(), Value::String(self.robot_id.clone()));
        }
        config
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct FindSkill {
    robot_id: String,
    params: Value,
    sensor_robot_id: Option<String>,
    action: Option<CombinedRobotAction>,
    done: bool,
}

#[async_trait]
impl Skill for FindSkill {
    async fn init(&mut self, env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.robot_id = params
            .get("robot_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.params = params.clone();
        self.done = false;

        let combiner = match super::combiner_or_failed(pipeline) {
            Ok(c) => c,
            Err(status) => return status,
        };
        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("find: no kinematics engine attached");
        };
        let sensor_id = match kinematics
            .select_sensor(SENSOR_TYPE_CAMERA_3D, TASK_FIND, &self.params, combiner.as_ref())
            .await
        {
            Ok(id) => id,
            Err(e) => return Status::failed(format!("find: sensor focus selection failed: {}", e)),
        };
        env.focus_sensors.insert(SENSOR_TYPE_CAMERA_3D.to_string(), sensor_id.clone());
        self.sensor_robot_id = Some(sensor_id);

        let Some(controller) = pipeline.controller_engine() else {
            return Status::unexpected("find: no controller engine attached");
        };
        let latest = controller.latest_state().await;
        let Some(current) = latest.robot_states.get(&self.robot_id) else {
            return Status::failed(format!("find: no known state for robot '{}'", self.robot_id));
        };

        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("find: no kinematics engine attached");
        };
        let Some(model) = kinematics.registry.entries.get(&self.robot_id).and_then(|e| e.model.clone()) else {
            return Status::failed(format!("find: robot '{}' has no model_robot attached", self.robot_id));
        };
        let goal = match model.configuration_for_task(TASK_FIND, &self.params, current).await {
            Ok(state) => state,
            Err(e) => return Status::failed(format!("find: configuration_for_task failed: {}", e)),
        };

        self.action = Some(
            CombinedRobotAction::new("find").with_action(self.robot_id.clone(), RobotAction::FkAction { goal }),
        );
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        let terminate = self.done;
        self.done = true;
        serde_json::json!({ "terminate": terminate })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.action.clone().unwrap_or_else(|| CombinedRobotAction::new("find"))
    }

    async fn on_finish(
        &mut self,
        env: &mut ExecutionContext,
        board: &mut Blackboard,
        pipeline: &EnginePipeline,
    ) -> Option<CombinedRobotAction> {
        let combiner = super::combiner_or_failed(pipeline).ok()?;
        let method = match combiner.recognition_method(TASK_FIND, &self.params).await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("find: recognition_method failed: {}", e);
                board.set(keys::FIND_TRUE, Value::Bool(false));
                return None;
            }
        };

        let sensor_id = self.sensor_robot_id.clone().or_else(|| env.focus_sensors.get(SENSOR_TYPE_CAMERA_3D).cloned());
        let Some(sensor) = sensor_id.and_then(|id| pipeline.sensor(&id)) else {
            log::warn!("find: no sensor attached for camera focus");
            board.set(keys::FIND_TRUE, Value::Bool(false));
            return None;
        };

        let (status, payload) = sensor.get_scenery_state(&method, &self.params).await;
        if status.is_success() {
            board.set(keys::FIND_TRUE, Value::Bool(true));
            board.set(keys::FIND_RESULT, payload);
        } else {
            log::debug!("find: recognition call returned {:?}: {}", status.kind, status.message);
            board.set(keys::FIND_TRUE, Value::Bool(false));
        }
        None
    }
}
