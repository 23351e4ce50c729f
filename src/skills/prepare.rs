//! `PREPARE`: dispatches `InitRobot` to every robot in the registry, one
//! step, no parameters.

use async_trait::async_trait;
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::model::{CombinedRobotAction, RobotAction, Status};
use crate::pipeline::EnginePipeline;
use crate::skill::{ExecutionContext, Skill, SkillDecoder};

#[derive(Default)]
pub struct PrepareDecoder;

#[async_trait]
impl SkillDecoder for PrepareDecoder {
    async fn decode(&mut self, _params: &Value, _board: &Blackboard) -> Status {
        Status::success()
    }

    async fn fill_runtime_parameters(
        &mut self,
        _board: &Blackboard,
        _env: &ExecutionContext,
        _pipeline: &EnginePipeline,
    ) -> Status {
        Status::success()
    }

    fn as_config(&self) -> Value {
        Value::Null
    }

    fn is_ready_for_execution(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct PrepareSkill {
    action: Option<CombinedRobotAction>,
    done: bool,
}

#[async_trait]
impl Skill for PrepareSkill {
    async fn init(&mut self, _env: &mut ExecutionContext, pipeline: &mut EnginePipeline, _params: &Value) -> Status {
        let Some(kinematics) = pipeline.kinematics() else {
            return Status::unexpected("prepare: no kinematics engine attached");
        };
        let mut action = CombinedRobotAction::new("prepare");
        for id in kinematics.registry.entries.keys() {
            action.actions.insert(id.clone(), vec![RobotAction::InitRobot]);
        }
        self.action = Some(action);
        self.done = false;
        Status::success()
    }

    async fn get_action(&mut self, _obs: &Value) -> Value {
        let terminate = self.done;
        self.done = true;
        serde_json::json!({ "terminate": terminate })
    }

    fn format_action(&self, _action: &Value) -> CombinedRobotAction {
        self.action.clone().unwrap_or_else(|| CombinedRobotAction::new("prepare"))
    }

    fn get_terminal(&self, _obs: &Value, action: &Value) -> bool {
        action.get("terminate").and_then(Value::as_bool).unwrap_or(false)
    }

    async fn on_finish(
        &mut self,
        _env: &mut ExecutionContext,
        _board: &mut Blackboard,
        _pipeline: &EnginePipeline,
    ) -> Option<CombinedRobotAction> {
        None
    }
}
