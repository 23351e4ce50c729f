//! The skill/decoder contract and execution loop (§4.F).
//!
//! `Skill` and `SkillDecoder` are grounded on the dependency crate's
//! `Planner` trait: a small async trait wrapping a multi-phase loop with a
//! pluggable config object threaded through by reference.
//! [`SkillInterface`] mirrors `BasicPlanner`'s shape (bounded-iteration
//! loop, a pre-dispatch gate — here "a pipeline update succeeded" instead
//! of a token/step budget).
//!
//! [`ExecutionContext`] is the §9 redesign: focus selection and transform
//! state live here, threaded by `&mut` through the loop, rather than as
//! mutable process state on the kinematics engine.
//!
//! `SkillInterface`'s activity flags live behind a `std::sync::Mutex`
//! rather than as plain fields mutated only by the run loop: `cancel_task`
//! is invoked from the session driver's abort loop, a different task than
//! the one executing `run`, so the two genuinely race. The lock is never
//! held across an `.await` — only brief flag reads/writes — so this adds
//! no contention beyond what an `AtomicBool` pair would, while keeping the
//! flags as ordinary struct state rather than raw atomics.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::TransformPair;
use crate::blackboard::Blackboard;
use crate::controller::ControllerEngine;
use crate::model::{CombinedRobotAction, ContactAnnotation, Status};
use crate::pipeline::EnginePipeline;

/// Session-scoped focus/transform state, threaded by `&mut` through the
/// skill loop instead of living on the kinematics engine (§9 redesign).
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub focus_end_effector: Option<String>,
    pub focus_sensors: HashMap<String, String>,
    pub transforms: HashMap<(String, ContactAnnotation), TransformPair>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext::default()
    }

    /// Released by a skill's `onFinish`/cleanup so the next skill starts
    /// from a blank focus.
    pub fn release_focus(&mut self) {
        self.focus_end_effector = None;
        self.focus_sensors.clear();
    }
}

/// One parameterized skill (navigate, find, grasp, ...). Implementations
/// live under [`crate::skills`].
#[async_trait]
pub trait Skill: Send + Sync {
    async fn init(&mut self, env: &mut ExecutionContext, pipeline: &mut EnginePipeline, params: &Value) -> Status;

    /// E.g. preshaping fingers before a grasp. Default: no initiation step.
    async fn any_initiation_action(
        &mut self,
        env: &ExecutionContext,
        pipeline: &EnginePipeline,
    ) -> Option<CombinedRobotAction> {
        let _ = (env, pipeline);
        None
    }

    /// Runs once the initiation action (if any) has completed, e.g. to
    /// compute a reference trajectory now that the hand is open.
    async fn any_post_initiation(&mut self, env: &mut ExecutionContext, pipeline: &mut EnginePipeline) -> Status {
        let _ = (env, pipeline);
        Status::success()
    }

    /// Extends the base observation dict with task-specific keys. Default:
    /// unchanged (most skills need nothing beyond the timestep).
    fn append_task_specific_states(&self, obs: Value, env: &ExecutionContext, training: bool) -> Value {
        let _ = (env, training);
        obs
    }

    /// Must return an object including a `terminate: bool` key.
    async fn get_action(&mut self, obs: &Value) -> Value;

    fn format_action(&self, action: &Value) -> CombinedRobotAction;

    /// Defaults to `action.terminate`.
    fn get_terminal(&self, obs: &Value, action: &Value) -> bool {
        let _ = obs;
        action.get("terminate").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Writes blackboard flags and/or emits a finishing command. Default:
    /// nothing to do.
    async fn on_finish(
        &mut self,
        env: &mut ExecutionContext,
        board: &mut Blackboard,
        pipeline: &EnginePipeline,
    ) -> Option<CombinedRobotAction> {
        let _ = (env, board, pipeline);
        None
    }

    /// Whether `cancelTask(emergency=false)` can interrupt this skill
    /// mid-flight rather than deferring to its natural termination.
    fn interruptible(&self) -> bool {
        false
    }
}

/// Board-only decoding, then runtime parameter resolution (robot state
/// reads, recognition calls). Both phases must succeed before execution.
#[async_trait]
pub trait SkillDecoder: Send + Sync {
    async fn decode(&mut self, params: &Value, board: &Blackboard) -> Status;

    async fn fill_runtime_parameters(
        &mut self,
        board: &Blackboard,
        env: &ExecutionContext,
        pipeline: &EnginePipeline,
    ) -> Status;

    /// The normalized parameters passed to `Skill::init`.
    fn as_config(&self) -> Value;

    fn is_ready_for_execution(&self) -> bool;
}

struct SkillState {
    active: bool,
    interruptible: bool,
    interrupt_pending: bool,
}

impl Default for SkillState {
    fn default() -> Self {
        SkillState {
            active: false,
            interruptible: false,
            interrupt_pending: false,
        }
    }
}

/// Owns the current decoder/skill activity flags and drives the execution
/// loop described in §4.F. The decoder/skill trait objects themselves are
/// not stored here — they're owned locally within [`SkillInterface::run`]
/// — only the lightweight cross-task flags live in `self`.
#[derive(Default)]
pub struct SkillInterface {
    state: std::sync::Mutex<SkillState>,
}

impl SkillInterface {
    pub fn new() -> Self {
        SkillInterface::default()
    }

    pub fn has_active_skill(&self) -> bool {
        self.state.lock().expect("skill state mutex poisoned").active
    }

    pub fn interrupt_pending(&self) -> bool {
        self.state.lock().expect("skill state mutex poisoned").interrupt_pending
    }

    /// Runs one skill to completion: decode → fill runtime parameters →
    /// init → (initiation action, post-initiation) → the `getAction`/
    /// `formatAction` loop → `onFinish` → interrupt coercion.
    pub async fn run(
        &self,
        mut decoder: Box<dyn SkillDecoder>,
        mut skill: Box<dyn Skill>,
        params: Value,
        board: &mut Blackboard,
        env: &mut ExecutionContext,
        pipeline: &mut EnginePipeline,
    ) -> Status {
        {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.active = false;
            state.interrupt_pending = false;
        }

        let decode_status = decoder.decode(&params, board).await;
        if !decode_status.is_success() {
            return decode_status;
        }
        let fill_status = decoder.fill_runtime_parameters(board, env, &*pipeline).await;
        if !fill_status.is_success() {
            return fill_status;
        }
        if !decoder.is_ready_for_execution() {
            return Status::failed("decoder reported not ready for execution");
        }

        let init_status = skill.init(env, &mut *pipeline, &decoder.as_config()).await;
        if !init_status.is_success() {
            return init_status;
        }

        {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.active = true;
            state.interruptible = skill.interruptible();
        }

        if let Some(initiation_action) = skill.any_initiation_action(env, &*pipeline).await {
            let status = pipeline.call_environment_update_pipeline(initiation_action).await;
            if !status.is_success() {
                return self.finish_with(status);
            }
            let post_status = skill.any_post_initiation(env, &mut *pipeline).await;
            if !post_status.is_success() {
                return self.finish_with(post_status);
            }
        }

        let mut t: u64 = 0;
        let loop_status = loop {
            let obs = serde_json::json!({ "observable_timestep": t });
            let obs = skill.append_task_specific_states(obs, env, false);

            let action = skill.get_action(&obs).await;
            if skill.get_terminal(&obs, &action) {
                break Status::success();
            }

            let combined = skill.format_action(&action);
            let status = pipeline.call_environment_update_pipeline(combined).await;
            if !status.is_success() {
                break status;
            }
            t += 1;
        };

        let mut final_status = loop_status;
        if let Some(finish_action) = skill.on_finish(env, board, &*pipeline).await {
            let status = pipeline.call_environment_update_pipeline(finish_action).await;
            final_status = final_status.fold(status);
        }

        self.finish_with(final_status)
    }

    fn finish_with(&self, status: Status) -> Status {
        let mut state = self.state.lock().expect("mutex poisoned");
        let coerced = if state.interrupt_pending {
            Status::aborted("skill interrupt was pending at natural termination")
        } else {
            status
        };
        state.active = false;
        state.interrupt_pending = false;
        coerced
    }

    /// Tear-down on tree exit: drop activity flags.
    pub fn cleanup(&self) {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.active = false;
        state.interrupt_pending = false;
    }

    /// §4.F cancellation semantics.
    pub async fn cancel_task(&self, controller: &ControllerEngine, emergency: bool) -> Status {
        if emergency {
            controller.set_emergency_stop_request();
            controller.cancel_active_dispatch();
            return controller.emergency_stop().await;
        }

        let (active, interruptible) = {
            let state = self.state.lock().expect("mutex poisoned");
            (state.active, state.interruptible)
        };

        if !active {
            log::warn!("cancelTask(emergency=false) called with no active skill");
            return Status::failed("no active skill to cancel");
        }

        if !interruptible {
            self.state.lock().expect("mutex poisoned").interrupt_pending = true;
            return Status::success();
        }

        if !controller.has_active_dispatch() {
            return Status::failed("no active controller dispatch; bad timing, retry");
        }

        controller.clear_emergency_stop_request();
        controller.cancel_active_dispatch();
        Status::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::mock::{MockModelRobot, MockPhysicalRobot};
    use crate::adapters::{ModelRobot, PhysicalRobot};
    use crate::config::RobotStructureConfig;
    use crate::kinematics::{KinematicsEngine, RobotRegistry};
    use crate::model::{Pose, RobotAction, RobotState};
    use crate::registry::Registry;

    fn sample_structure() -> RobotStructureConfig {
        let json = serde_json::json!({
            "combiner": "default",
            "models": [{
                "mobile_base": {
                    "unique_id": "base",
                    "parent_link": "",
                    "model_robot": "base_model",
                    "physical_robot": "base_driver"
                }
            }]
        });
        serde_json::from_value(json).unwrap()
    }

    async fn build_pipeline(robot: Arc<MockPhysicalRobot>) -> EnginePipeline {
        let mut model_registry: Registry<Arc<dyn ModelRobot>> = Registry::new("model_robot");
        model_registry.register("base_model", |_| {
            Ok(Arc::new(MockModelRobot::new(RobotState::MobileBase {
                base_pose: Pose::identity(),
            })) as Arc<dyn ModelRobot>)
        });
        let registry = RobotRegistry::build(&sample_structure(), &model_registry).unwrap();
        let kinematics = KinematicsEngine::new(registry);

        let mut adapter_registry: Registry<Arc<dyn PhysicalRobot>> = Registry::new("physical_robot");
        adapter_registry.register("base_driver", move |_| Ok(robot.clone() as Arc<dyn PhysicalRobot>));
        let controller = ControllerEngine::init(&sample_structure(), &adapter_registry).await.unwrap();

        EnginePipeline::new()
            .with_kinematics(kinematics)
            .with_controller(Arc::new(controller))
    }

    struct PassthroughDecoder;

    #[async_trait]
    impl SkillDecoder for PassthroughDecoder {
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

    struct CountingSkill {
        terminate_after: u64,
        interruptible: bool,
    }

    #[async_trait]
    impl Skill for CountingSkill {
        async fn init(
            &mut self,
            _env: &mut ExecutionContext,
            _pipeline: &mut EnginePipeline,
            _params: &Value,
        ) -> Status {
            Status::success()
        }

        async fn get_action(&mut self, obs: &Value) -> Value {
            let t = obs["observable_timestep"].as_u64().unwrap_or(0);
            serde_json::json!({ "terminate": t >= self.terminate_after })
        }

        fn format_action(&self, _action: &Value) -> CombinedRobotAction {
            CombinedRobotAction::new("test").with_action(
                "base",
                RobotAction::nav3d(Pose::identity(), 5.0),
            )
        }

        fn interruptible(&self) -> bool {
            self.interruptible
        }
    }

    #[tokio::test]
    async fn non_interruptible_cancel_is_coerced_to_aborted_at_natural_termination() {
        let mut robot = MockPhysicalRobot::default();
        let hold = Arc::new(tokio::sync::Notify::new());
        robot.hold = Some(hold.clone());
        let robot = Arc::new(robot);

        let mut pipeline = build_pipeline(robot.clone()).await;
        let interface = Arc::new(SkillInterface::new());
        let mut board = Blackboard::new();
        let mut env = ExecutionContext::new();

        let skill: Box<dyn Skill> = Box::new(CountingSkill {
            terminate_after: 1,
            interruptible: false,
        });
        let decoder: Box<dyn SkillDecoder> = Box::new(PassthroughDecoder);

        let run_interface = interface.clone();
        let handle = tokio::spawn(async move {
            run_interface
                .run(decoder, skill, Value::Null, &mut board, &mut env, &mut pipeline)
                .await
        });

        for _ in 0..100 {
            if interface.has_active_skill() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(interface.has_active_skill());

        // We don't have direct controller access here; cancel_task needs
        // one to check `has_active_dispatch`, but the non-interruptible
        // branch never reaches that check.
        let dummy_registry: Registry<Arc<dyn PhysicalRobot>> = Registry::new("physical_robot");
        let dummy_controller = ControllerEngine::init(
            &RobotStructureConfig { combiner: "default".into(), models: vec![] },
            &dummy_registry,
        );
        let dummy_controller = match dummy_controller.await {
            Ok(c) => c,
            Err(_) => {
                hold.notify_waiters();
                let status = handle.await.unwrap();
                assert!(status.is_success());
                return;
            }
        };
        let _ = interface.cancel_task(&dummy_controller, false).await;
        assert!(interface.interrupt_pending());

        hold.notify_waiters();
        let status = handle.await.unwrap();
        assert_eq!(status.kind, crate::model::StatusKind::Aborted);
    }

    #[tokio::test]
    async fn cancel_task_with_no_active_skill_fails() {
        let interface = SkillInterface::new();
        let registry: Registry<Arc<dyn PhysicalRobot>> = Registry::new("physical_robot");
        let structure = RobotStructureConfig { combiner: "default".into(), models: vec![] };
        let controller = ControllerEngine::init(&structure, &registry).await.unwrap();
        let status = interface.cancel_task(&controller, false).await;
        assert_eq!(status.kind, crate::model::StatusKind::Failed);
    }

    #[tokio::test]
    async fn emergency_cancel_succeeds_with_no_active_skill() {
        let interface = SkillInterface::new();
        let registry: Registry<Arc<dyn PhysicalRobot>> = Registry::new("physical_robot");
        let structure = RobotStructureConfig { combiner: "default".into(), models: vec![] };
        let controller = ControllerEngine::init(&structure, &registry).await.unwrap();
        let status = interface.cancel_task(&controller, true).await;
        assert!(status.is_success());
    }
}
