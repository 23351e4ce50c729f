//! `LOOK`: sets sensor focus, then one step of `PointToAction` aimed at a
//! target point taken from a blackboard reference (`{key}` syntax) or a
//! literal point; absent either, points at nothing (`null`).

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, Point, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

const DEFAULT_SENSOR_TYPE: &str = "CAMERA_3D";
const TASK_LOOK: &str = "look";

fn parse_point(value: &Value) -> Option<Point> {
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    let z = value.get("z")?.as_f64()?;
    Some(Point::new(x, y, z))
}

#[derive(Default)]
pub struct LookDecoder {
    robot_id: String,
    sensor_type: String,
    source_link: String,
    target: Option<Point>,
    ready: bool,
}

#[async_trait]
impl SkillDecoder for LookDecoder {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status {
        self.robot_id = params
            .get("robot_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.sensor_type = params
            .get("sensor_type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SENSOR_TYPE)
            .to_string();
        self.source_link = params.get("source_link").and_then(Value::as_str).unwrap_or_default().to_string();

        self.target = match params.get("target") {
            Some(raw) => {
                let resolved = super::resolve_value(board, raw);
                parse_point(&resolved)
            }
            None => None,
        };
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        _env: &ExecutionContext,
        pipeline: &EnginePipeline,
    ) -> Status {
        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("look: no kinematics engine attached");
        };
        if self.robot_id.is_empty() {
            self.robot_id = kinematics.registry.base_id.clone();
        }
        self.ready = true;
        Status::success()
    }

    fn as_config(&self) -> Value {
        serde_json::json!({
            "robot_id": self.robot_id,
            "sensor_type": self.sensor_type,
            "source_link": self.source_link,
            "target": self.target.map(|p| serde_json::json!({"x": p.x, "y": p.y, "z": p.z})),
        })
    }

    fn is_ready_for_execution(&self) -> bool {
        self.ready
    }
}

#[derive(Default)]
pub struct LookSkill {
    action: Option<CombinedRobotAction>,
    done: bool,
}

#[async_trait]
impl Skill for LookSkill {
    async fn init(&mut self, env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status {
        self.done = false;
        let robot_id = params.get("robot_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let sensor_type = params.get("sensor_type").and_then(Value::as_str).unwrap_or(DEFAULT_SENSOR_TYPE);
        let source_link = params.get("source_link").and_then(Value::as_str).unwrap_or_default().to_string();
        let point = params.get("target").and_then(parse_point).unwrap_or_default();

        let combiner = match super::combiner_or_failed(pipeline) {
            Ok(c) => c,
            Err(status) => return status,
        };
        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("look: no kinematics engine attached");
        };
        let sensor_id = match kinematics.select_sensor(sensor_type, TASK_LOOK, params, combiner.as_ref()).await {
            Ok(id) => id,
            Err(e) => return Status::failed(format!("look: sensor focus selection failed: {}", e)),
        };
        env.focus_sensors.insert(sensor_type.to_string(), sensor_id);

        self.action = Some(CombinedRobotAction::new("look").with_action(
            robot_id,
            RobotAction::PointToAction {
                point,
                source_link,
                context: None,
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
        self.action.clone().unwrap_or_else(|| CombinedRobotAction::new("look"))
    }
}
