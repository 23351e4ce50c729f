//! The session driver (§4.I): three long-lived command loops (`setup`,
//! `run`, `abort`) fed by single-slot "queue of latest" mailboxes, mediating
//! between the control channel and the engine pipeline / interpreter.
//!
//! §9's "Queue-of-latest messaging" redesign note calls for a single-slot
//! mailbox per command type, overwritten on receive, rather than the
//! source's per-command list-and-take-newest. A [`tokio::sync::watch`]
//! channel already has exactly that shape (each `send` overwrites the held
//! value; a receiver that hasn't caught up only ever observes the latest
//! one on its next `changed().await`), so it's used directly instead of
//! hand-rolling a mailbox type. There is no single teacher file with three
//! parallel consumer loops over independent mailboxes, so the loop bodies
//! follow the dependency crate's general fire-and-forget task shape seen in
//! `agent.rs` (`tokio::spawn` a detached async block per concern) rather
//! than one specific function.
//!
//! [`SkillInterface`] and the active controller are reachable without
//! waiting on the lock the `run` loop holds for the whole tree walk, per
//! `skill.rs`'s own doc comment: cancellation genuinely races the run loop,
//! so it must not be serialized behind the same mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::adapters::{ModelRobot, PhysicalRobot, PhysicalSensor, RobotCombiner};
use crate::blackboard::Blackboard;
use crate::config::SessionConfig;
use crate::controller::ControllerEngine;
use crate::interpreter::{BehaviorTreeDocument, Interpreter};
use crate::kinematics::{KinematicsEngine, RobotRegistry, SensorManager};
use crate::model::Status;
use crate::pipeline::EnginePipeline;
use crate::registry::Registry;
use crate::skill::{ExecutionContext, Skill, SkillDecoder, SkillInterface};
use crate::wire::{Command, Response, ResponseType};

/// The five name → factory registries an embedding application builds once
/// and hands to the driver; every `setup` resolves topology/library names
/// against these (§9 "Dynamic dispatch by name strings").
pub struct AdapterRegistries {
    pub model_robot: Registry<Arc<dyn ModelRobot>>,
    pub physical_robot: Registry<Arc<dyn PhysicalRobot>>,
    pub physical_sensor: Registry<Arc<dyn PhysicalSensor>>,
    pub combiner: Registry<Arc<dyn RobotCombiner>>,
    pub skill: Registry<Box<dyn Skill>>,
    pub decoder: Registry<Box<dyn SkillDecoder>>,
}

impl AdapterRegistries {
    pub fn new() -> Self {
        AdapterRegistries {
            model_robot: Registry::new("model_robot"),
            physical_robot: Registry::new("physical_robot"),
            physical_sensor: Registry::new("physical_sensor"),
            combiner: Registry::new("combiner"),
            skill: Registry::new("skill"),
            decoder: Registry::new("decoder"),
        }
    }
}

impl Default for AdapterRegistries {
    fn default() -> Self {
        AdapterRegistries::new()
    }
}

/// Everything a configured session needs to run trees: rebuilt wholesale on
/// every successful `setup`, never mutated field-by-field across setups.
struct SessionInner {
    pipeline: EnginePipeline,
    interpreter: Interpreter,
    board: Blackboard,
    env: ExecutionContext,
}

/// Join handles for the three spawned command loops, returned by
/// [`SessionDriver::spawn`] so a caller (tests, or an embedding
/// application's shutdown path) can tear them down explicitly.
pub struct SessionLoops {
    pub setup: JoinHandle<()>,
    pub run: JoinHandle<()>,
    pub abort: JoinHandle<()>,
}

impl SessionLoops {
    pub fn abort_all(&self) {
        self.setup.abort();
        self.run.abort();
        self.abort.abort();
    }
}

/// Exposes the `setup`/`run`/`abort` flows over a queue-per-command
/// transport (§4.I). The transport itself — how [`Command`]s arrive and
/// how [`Response`]s leave — is external; this type only owns the mailbox
/// discipline and the mediation logic.
pub struct SessionDriver {
    registries: AdapterRegistries,
    skill_interface: Arc<SkillInterface>,
    /// The currently active controller, kept outside `session`'s lock so
    /// `abort` never blocks behind a `run` in progress.
    controller: AsyncMutex<Option<Arc<ControllerEngine>>>,
    session: AsyncMutex<Option<SessionInner>>,
    run_in_progress: AtomicBool,
    setup_tx: watch::Sender<Option<Command>>,
    run_tx: watch::Sender<Option<Command>>,
    abort_tx: watch::Sender<Option<Command>>,
    responses: mpsc::UnboundedSender<Response>,
}

impl SessionDriver {
    pub fn new(registries: AdapterRegistries) -> (Arc<SessionDriver>, mpsc::UnboundedReceiver<Response>) {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (setup_tx, _) = watch::channel(None);
        let (run_tx, _) = watch::channel(None);
        let (abort_tx, _) = watch::channel(None);

        let driver = Arc::new(SessionDriver {
            registries,
            skill_interface: Arc::new(SkillInterface::new()),
            controller: AsyncMutex::new(None),
            session: AsyncMutex::new(None),
            run_in_progress: AtomicBool::new(false),
            setup_tx,
            run_tx,
            abort_tx,
            responses: responses_tx,
        });

        (driver, responses_rx)
    }

    /// Routes `command` into its mailbox. Per §4.I's queue discipline, a
    /// command of a kind that's already pending is simply overwritten —
    /// the driver never falls behind by more than one unprocessed command
    /// per kind.
    pub fn submit(&self, command: Command) {
        match &command {
            Command::Setup { .. } => {
                let _ = self.setup_tx.send(Some(command));
            }
            Command::Run { .. } => {
                let _ = self.run_tx.send(Some(command));
            }
            Command::Abort { .. } => {
                let _ = self.abort_tx.send(Some(command));
            }
        }
    }

    /// Spawns the three long-lived command loops. Each subscribes to its
    /// mailbox at spawn time, so only commands submitted after `spawn` is
    /// called are observed.
    pub fn spawn(self: &Arc<Self>) -> SessionLoops {
        let setup_rx = self.setup_tx.subscribe();
        let run_rx = self.run_tx.subscribe();
        let abort_rx = self.abort_tx.subscribe();

        SessionLoops {
            setup: tokio::spawn(Arc::clone(self).setup_loop(setup_rx)),
            run: tokio::spawn(Arc::clone(self).run_loop(run_rx)),
            abort: tokio::spawn(Arc::clone(self).abort_loop(abort_rx)),
        }
    }

    async fn setup_loop(self: Arc<Self>, mut rx: watch::Receiver<Option<Command>>) {
        while rx.changed().await.is_ok() {
            let Some(Command::Setup { id, content }) = rx.borrow_and_update().clone() else {
                continue;
            };
            let response = self.handle_setup(id, content).await;
            let _ = self.responses.send(response);
        }
    }

    async fn run_loop(self: Arc<Self>, mut rx: watch::Receiver<Option<Command>>) {
        while rx.changed().await.is_ok() {
            let Some(Command::Run { id, content, node_pointer }) = rx.borrow_and_update().clone() else {
                continue;
            };
            let response = self.handle_run(id, content, node_pointer).await;
            let _ = self.responses.send(response);
        }
    }

    async fn abort_loop(self: Arc<Self>, mut rx: watch::Receiver<Option<Command>>) {
        while rx.changed().await.is_ok() {
            let Some(Command::Abort { id, emergency }) = rx.borrow_and_update().clone() else {
                continue;
            };
            let response = self.handle_abort(id, emergency).await;
            let _ = self.responses.send(response);
        }
    }

    /// Deserialize config, reject with `Failed` if a `run` is in progress,
    /// (re)initialize the engine pipeline and interpreter, call
    /// `callEnvironmentLoadPipeline`, then swap the new session in.
    async fn handle_setup(&self, id: String, content: Value) -> Response {
        if self.run_in_progress.load(Ordering::SeqCst) {
            return Response::error(id, Status::failed("setup rejected: a run is already in progress"));
        }

        let config: SessionConfig = match serde_json::from_value(content) {
            Ok(c) => c,
            Err(e) => return Response::error(id, Status::failed(format!("invalid configuration: {}", e))),
        };

        let inner = match self.build_session(&config).await {
            Ok(inner) => inner,
            Err(status) => return Response::error(id, status),
        };

        let new_controller = inner.pipeline.controller_engine();

        let previous = {
            let mut guard = self.session.lock().await;
            guard.replace(inner)
        };
        *self.controller.lock().await = new_controller;

        if let Some(previous) = previous {
            if let Some(old_controller) = previous.pipeline.controller_engine() {
                old_controller.close().await;
            }
        }

        Response {
            id,
            kind: ResponseType::Response,
            completion: true,
            status: Status::success().into(),
            logs: None,
        }
    }

    async fn build_session(&self, config: &SessionConfig) -> Result<SessionInner, Status> {
        let registry = RobotRegistry::build(&config.robot_structure, &self.registries.model_robot)
            .map_err(|e| Status::failed(format!("topology: {}", e)))?;
        let kinematics = KinematicsEngine::new(registry);

        let controller = ControllerEngine::init(&config.robot_structure, &self.registries.physical_robot)
            .await
            .map_err(|e| Status::failed(format!("controller init: {}", e)))?;

        let sensors = SensorManager::build(&config.robot_structure, &self.registries.physical_sensor)
            .await
            .map_err(|e| Status::failed(format!("sensors: {}", e)))?;

        let combiner = self
            .registries
            .combiner
            .resolve(&config.robot_structure.combiner, &Value::Null)
            .map_err(|e| Status::failed(format!("combiner: {}", e)))?;

        let mut pipeline = EnginePipeline::new()
            .with_kinematics(kinematics)
            .with_controller(Arc::new(controller))
            .with_sensors(sensors)
            .with_combiner(combiner);

        pipeline
            .init()
            .await
            .map_err(|e| Status::failed(format!("pipeline init: {}", e)))?;

        let load_status = pipeline.call_environment_load_pipeline(&config.general).await;
        if !load_status.is_success() {
            return Err(load_status);
        }

        let interpreter = Interpreter::new(
            self.registries.skill.clone(),
            self.registries.decoder.clone(),
            config.library.clone(),
        );

        Ok(SessionInner {
            pipeline,
            interpreter,
            board: Blackboard::new(),
            env: ExecutionContext::new(),
        })
    }

    /// Launches tree execution over the currently configured session; on
    /// completion replies with status plus the interpreter's
    /// last-executed-node telemetry (§4.I "run").
    async fn handle_run(&self, id: String, content: Value, node_pointer: Option<Vec<usize>>) -> Response {
        let tree: BehaviorTreeDocument = match serde_json::from_value(content) {
            Ok(t) => t,
            Err(e) => return Response::error(id, Status::failed(format!("invalid tree: {}", e))),
        };

        self.run_in_progress.store(true, Ordering::SeqCst);
        let mut guard = self.session.lock().await;
        let Some(inner) = guard.as_mut() else {
            self.run_in_progress.store(false, Ordering::SeqCst);
            return Response::error(id, Status::failed("no session configured; call setup first"));
        };

        let (status, logs) = inner
            .interpreter
            .run_document(
                &tree,
                &mut inner.board,
                &mut inner.env,
                &mut inner.pipeline,
                &self.skill_interface,
                node_pointer,
                None,
            )
            .await;

        drop(guard);
        self.run_in_progress.store(false, Ordering::SeqCst);

        Response::completed(id, status, logs)
    }

    /// Delegates to `cancelTask(env, emergency)` against whichever
    /// controller is currently active (§4.I "abort"). Reachable while a
    /// `run` is in progress since it never touches `self.session`'s lock.
    async fn handle_abort(&self, id: String, emergency: bool) -> Response {
        let controller = self.controller.lock().await.clone();
        let Some(controller) = controller else {
            return Response::aborted(id, Status::failed("no controller configured; call setup first"));
        };

        let status = self.skill_interface.cancel_task(&controller, emergency).await;
        Response::aborted(id, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::mock::{MockModelRobot, MockPhysicalRobot, MockRobotCombiner};
    use crate::model::{Pose, RobotState, StatusKind};

    fn sample_config() -> Value {
        serde_json::json!({
            "general": {},
            "library": {
                "WAIT": {"decoder": "passthrough", "src": "noop"}
            },
            "robot_structure": {
                "combiner": "default",
                "models": [{
                    "mobile_base": {
                        "unique_id": "base",
                        "parent_link": "",
                        "model_robot": "base_model",
                        "physical_robot": "base_driver"
                    }
                }]
            },
            "engines": {
                "kinematics": {"engine": "kinematics", "class_id": "k1"},
                "controller": {"engine": "controller", "class_id": "c1"}
            }
        })
    }

    struct PassthroughDecoder;

    #[async_trait::async_trait]
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

    struct NoopSkill;

    #[async_trait::async_trait]
    impl Skill for NoopSkill {
        async fn init(&mut self, _env: &mut ExecutionContext, _pipeline: &mut EnginePipeline, _params: &Value) -> Status {
            Status::success()
        }
        async fn get_action(&mut self, _obs: &Value) -> Value {
            serde_json::json!({ "terminate": true })
        }
        fn format_action(&self, _action: &Value) -> crate::model::CombinedRobotAction {
            crate::model::CombinedRobotAction::new("noop")
        }
    }

    fn registries() -> AdapterRegistries {
        let mut registries = AdapterRegistries::new();

        registries.model_robot.register("base_model", |_| {
            Ok(Arc::new(MockModelRobot::new(RobotState::MobileBase {
                base_pose: Pose::identity(),
            })) as Arc<dyn ModelRobot>)
        });
        registries.physical_robot.register("base_driver", |_| {
            Ok(Arc::new(MockPhysicalRobot::default()) as Arc<dyn PhysicalRobot>)
        });
        registries.combiner.register("default", |_| {
            Ok(Arc::new(MockRobotCombiner {
                end_effector_id: "base".to_string(),
                sensor_id: "base".to_string(),
                recognition_method: "default".to_string(),
            }) as Arc<dyn RobotCombiner>)
        });
        registries.skill.register("noop", |_| Ok(Box::new(NoopSkill) as Box<dyn Skill>));
        registries
            .decoder
            .register("passthrough", |_| Ok(Box::new(PassthroughDecoder) as Box<dyn SkillDecoder>));

        registries
    }

    async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<Response>) -> Response {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("response timed out")
            .expect("response channel closed")
    }

    #[tokio::test]
    async fn setup_then_run_succeeds() {
        let (driver, mut responses) = SessionDriver::new(registries());
        let _loops = driver.spawn();

        driver.submit(Command::Setup {
            id: "setup-1".to_string(),
            content: sample_config(),
        });
        let setup_response = recv_with_timeout(&mut responses).await;
        assert!(setup_response.completion);
        assert_eq!(setup_response.status.error_code, StatusKind::Success);

        let tree = serde_json::json!({
            "root": { "BehaviorTree": { "ID": "t", "Tree": [ {"Node": "WAIT"} ] } }
        });
        driver.submit(Command::Run {
            id: "run-1".to_string(),
            content: tree,
            node_pointer: None,
        });
        let run_response = recv_with_timeout(&mut responses).await;
        assert!(run_response.completion);
        assert_eq!(run_response.status.error_code, StatusKind::Success);
        assert_eq!(run_response.logs.unwrap().node_name, "WAIT");
    }

    #[tokio::test]
    async fn run_without_setup_fails() {
        let (driver, mut responses) = SessionDriver::new(registries());
        let _loops = driver.spawn();

        let tree = serde_json::json!({
            "root": { "BehaviorTree": { "ID": "t", "Tree": [] } }
        });
        driver.submit(Command::Run {
            id: "run-1".to_string(),
            content: tree,
            node_pointer: None,
        });
        let response = recv_with_timeout(&mut responses).await;
        assert!(!response.completion);
        assert_eq!(response.status.error_code, StatusKind::Failed);
    }

    #[tokio::test]
    async fn abort_without_setup_fails_gracefully() {
        let (driver, mut responses) = SessionDriver::new(registries());
        let _loops = driver.spawn();

        driver.submit(Command::Abort {
            id: "abort-1".to_string(),
            emergency: false,
        });
        let response = recv_with_timeout(&mut responses).await;
        assert_eq!(response.status.error_code, StatusKind::Failed);
    }

    #[tokio::test]
    async fn emergency_abort_after_setup_succeeds_with_no_active_skill() {
        let (driver, mut responses) = SessionDriver::new(registries());
        let _loops = driver.spawn();

        driver.submit(Command::Setup {
            id: "setup-1".to_string(),
            content: sample_config(),
        });
        let _ = recv_with_timeout(&mut responses).await;

        driver.submit(Command::Abort {
            id: "abort-1".to_string(),
            emergency: true,
        });
        let response = recv_with_timeout(&mut responses).await;
        assert_eq!(response.status.error_code, StatusKind::Success);
    }

    #[tokio::test]
    async fn setup_is_rejected_while_a_run_is_in_progress() {
        let (driver, mut responses) = SessionDriver::new(registries());
        let _loops = driver.spawn();

        driver.run_in_progress.store(true, Ordering::SeqCst);
        driver.submit(Command::Setup {
            id: "setup-1".to_string(),
            content: sample_config(),
        });
        let response = recv_with_timeout(&mut responses).await;
        assert!(!response.completion);
        assert_eq!(response.status.error_code, StatusKind::Failed);
    }
}
