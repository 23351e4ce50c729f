//! The engine pipeline orchestrator (§4.E): owns the kinematics and
//! controller engines plus up to four optional simulation-facing engines
//! (`data`, `world_constructor`, `physics_sim`, `rendering_sim`), all
//! identical in shape behind [`SimEngine`].
//!
//! Builder-style construction is grounded on the dependency crate's
//! `Orchestration` builder (`with_mode`, `with_max_tokens`, `add_agent`):
//! each optional engine is attached with its own `with_*` method before
//! `init` validates the pipeline is complete.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::adapters::RobotCombiner;
use crate::controller::ControllerEngine;
use crate::error::RuntimeError;
use crate::kinematics::{KinematicsEngine, SensorManager};
use crate::model::{CombinedRobotAction, CombinedRobotState, Status};

/// Uniform shape for the optional simulation-facing engines: `data`,
/// `world_constructor`, `physics_sim`, `rendering_sim`. Kinematics and
/// controller are not expressed through this trait since their
/// `update` signatures (sync registry bookkeeping vs. async adapter
/// dispatch) genuinely differ; these four are "transparent pass-throughs
/// identical in shape" per §4.E and share one contract.
#[async_trait]
pub trait SimEngine: Send + Sync {
    /// Used to deduplicate engines that share one simulated world during
    /// `call_environment_load_pipeline`.
    fn class_id(&self) -> &str;
    async fn reset(&self) -> Result<(), RuntimeError>;
    async fn load_components(&self, params: &serde_json::Value) -> Result<(), RuntimeError>;
    async fn load_robot(&self, state: &CombinedRobotState) -> Result<(), RuntimeError>;
    async fn update(&self, action: &CombinedRobotAction) -> Status;
    async fn close(&self);
}

#[derive(Default)]
pub struct EnginePipeline {
    kinematics: Option<KinematicsEngine>,
    controller: Option<Arc<ControllerEngine>>,
    sensors: Option<SensorManager>,
    combiner: Option<Arc<dyn RobotCombiner>>,
    data: Option<Arc<dyn SimEngine>>,
    world_constructor: Option<Arc<dyn SimEngine>>,
    physics_sim: Option<Arc<dyn SimEngine>>,
    rendering_sim: Option<Arc<dyn SimEngine>>,
}

impl EnginePipeline {
    pub fn new() -> Self {
        EnginePipeline::default()
    }

    pub fn with_kinematics(mut self, engine: KinematicsEngine) -> Self {
        self.kinematics = Some(engine);
        self
    }

    pub fn with_controller(mut self, engine: Arc<ControllerEngine>) -> Self {
        self.controller = Some(engine);
        self
    }

    pub fn with_sensors(mut self, sensors: SensorManager) -> Self {
        self.sensors = Some(sensors);
        self
    }

    pub fn with_combiner(mut self, combiner: Arc<dyn RobotCombiner>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn kinematics(&self) -> Option<&KinematicsEngine> {
        self.kinematics.as_ref()
    }

    pub fn kinematics_mut(&mut self) -> Option<&mut KinematicsEngine> {
        self.kinematics.as_mut()
    }

    pub fn controller_engine(&self) -> Option<Arc<ControllerEngine>> {
        self.controller.clone()
    }

    pub fn sensor(&self, robot_id: &str) -> Option<Arc<dyn crate::adapters::PhysicalSensor>> {
        self.sensors.as_ref().and_then(|s| s.get(robot_id))
    }

    pub fn combiner(&self) -> Option<Arc<dyn RobotCombiner>> {
        self.combiner.clone()
    }

    pub fn with_data_engine(mut self, engine: Arc<dyn SimEngine>) -> Self {
        self.data = Some(engine);
        self
    }

    pub fn with_world_constructor(mut self, engine: Arc<dyn SimEngine>) -> Self {
        self.world_constructor = Some(engine);
        self
    }

    pub fn with_physics_sim(mut self, engine: Arc<dyn SimEngine>) -> Self {
        self.physics_sim = Some(engine);
        self
    }

    pub fn with_rendering_sim(mut self, engine: Arc<dyn SimEngine>) -> Self {
        self.rendering_sim = Some(engine);
        self
    }

    fn optional_engines(&self) -> Vec<Arc<dyn SimEngine>> {
        [&self.data, &self.world_constructor, &self.physics_sim, &self.rendering_sim]
            .into_iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    /// Validates `kinematics`/`controller` are attached, closes any
    /// previously-running optional engines, then resets and re-attaches
    /// each currently-held optional engine — both fan-outs are parallel
    /// `JoinSet` groups, the close group awaited fully before the reset
    /// group starts (§4.E).
    pub async fn init(&mut self) -> Result<(), RuntimeError> {
        if self.kinematics.is_none() {
            return Err(RuntimeError::MissingEngine { which: "kinematics" });
        }
        if self.controller.is_none() {
            return Err(RuntimeError::MissingEngine { which: "controller" });
        }

        let engines = self.optional_engines();

        let mut close_set: JoinSet<()> = JoinSet::new();
        for engine in engines.iter().cloned() {
            close_set.spawn(async move { engine.close().await });
        }
        while close_set.join_next().await.is_some() {}

        let mut reset_set: JoinSet<Result<(), RuntimeError>> = JoinSet::new();
        for engine in engines.iter().cloned() {
            reset_set.spawn(async move { engine.reset().await });
        }
        while let Some(res) = reset_set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("engine pipeline init: reset failed: {}", e),
                Err(join_err) => log::error!("engine pipeline init: reset task panicked: {}", join_err),
            }
        }

        Ok(())
    }

    /// Queries the world constructor (if any) for spawn components,
    /// snapshots current robot state from the controller, then issues
    /// `reset`/`load_components`/`load_robot` to the simulation engines,
    /// deduplicated by `class_id` so engines sharing a world aren't loaded
    /// twice.
    pub async fn call_environment_load_pipeline(&self, params: &serde_json::Value) -> Status {
        let Some(controller) = &self.controller else {
            return Status::unexpected("engine pipeline has no controller attached");
        };

        if let Some(world) = &self.world_constructor {
            if let Err(e) = world.load_components(params).await {
                return Status::failed(format!("world_constructor load_components failed: {}", e));
            }
        }

        let state = controller.latest_state().await;

        let mut seen_class_ids = HashSet::new();
        let mut targets = Vec::new();
        for engine in [&self.physics_sim, &self.rendering_sim].into_iter().filter_map(|slot| slot.clone()) {
            if seen_class_ids.insert(engine.class_id().to_string()) {
                targets.push(engine);
            }
        }

        let mut overall = Status::success();
        for engine in targets {
            if let Err(e) = engine.reset().await {
                overall = overall.fold(Status::failed(format!("{}: reset failed: {}", engine.class_id(), e)));
                continue;
            }
            if let Err(e) = engine.load_components(params).await {
                overall = overall.fold(Status::failed(format!("{}: load_components failed: {}", engine.class_id(), e)));
                continue;
            }
            if let Err(e) = engine.load_robot(&state).await {
                overall = overall.fold(Status::failed(format!("{}: load_robot failed: {}", engine.class_id(), e)));
            }
        }
        overall
    }

    /// The per-step hot path: `kinematics.update → controller.update →
    /// (optional) physics.update → (optional) rendering.update`. Each
    /// stage sees the previous stage's output; any non-success
    /// short-circuits and propagates immediately (§4.E, §5 ordering
    /// guarantee).
    pub async fn call_environment_update_pipeline(&mut self, action: CombinedRobotAction) -> Status {
        let Some(kinematics) = self.kinematics.as_mut() else {
            return Status::unexpected("engine pipeline has no kinematics engine attached");
        };
        let kinematics_action = kinematics.update(&action);

        let Some(controller) = &self.controller else {
            return Status::unexpected("engine pipeline has no controller attached");
        };
        let status = controller.update(&kinematics_action).await;
        if !status.is_success() {
            return status;
        }

        if let Some(physics) = &self.physics_sim {
            let status = physics.update(&kinematics_action).await;
            if !status.is_success() {
                return status;
            }
        }

        if let Some(rendering) = &self.rendering_sim {
            let status = rendering.update(&kinematics_action).await;
            if !status.is_success() {
                return status;
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockPhysicalRobot;
    use crate::adapters::PhysicalRobot;
    use crate::kinematics::{KinematicsEngine, RobotRegistry};
    use crate::model::RobotState;
    use crate::registry::Registry;

    struct StubSimEngine {
        class_id: String,
        update_status: Status,
    }

    #[async_trait]
    impl SimEngine for StubSimEngine {
        fn class_id(&self) -> &str {
            &self.class_id
        }

        async fn reset(&self) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn load_components(&self, _params: &serde_json::Value) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn load_robot(&self, _state: &CombinedRobotState) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn update(&self, _action: &CombinedRobotAction) -> Status {
            self.update_status.clone()
        }

        async fn close(&self) {}
    }

    fn sample_structure() -> crate::config::RobotStructureConfig {
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

    async fn build_pipeline() -> EnginePipeline {
        use crate::adapters::ModelRobot;

        let mut model_registry: Registry<Arc<dyn ModelRobot>> = Registry::new("model_robot");
        model_registry.register("base_model", |_| {
            Ok(Arc::new(crate::adapters::mock::MockModelRobot::new(RobotState::MobileBase {
                base_pose: crate::model::Pose::identity(),
            })) as Arc<dyn ModelRobot>)
        });

        let registry = RobotRegistry::build(&sample_structure(), &model_registry).unwrap();
        let kinematics = KinematicsEngine::new(registry);

        let mut adapter_registry: Registry<Arc<dyn PhysicalRobot>> = Registry::new("physical_robot");
        adapter_registry.register("base_driver", |_| {
            Ok(Arc::new(MockPhysicalRobot::default()) as Arc<dyn PhysicalRobot>)
        });
        let controller = ControllerEngine::init(&sample_structure(), &adapter_registry)
            .await
            .unwrap();

        EnginePipeline::new()
            .with_kinematics(kinematics)
            .with_controller(Arc::new(controller))
    }

    #[tokio::test]
    async fn init_rejects_missing_required_engines() {
        let mut pipeline = EnginePipeline::new();
        let err = pipeline.init().await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingEngine { which: "kinematics" }));
    }

    #[tokio::test]
    async fn update_pipeline_runs_kinematics_then_controller() {
        let mut pipeline = build_pipeline().await;
        pipeline.init().await.unwrap();

        let mut action = CombinedRobotAction::new("nav");
        action.actions.insert(
            "base".to_string(),
            vec![crate::model::RobotAction::nav3d(crate::model::Pose::identity(), 1.0)],
        );

        let status = pipeline.call_environment_update_pipeline(action).await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn update_pipeline_short_circuits_on_physics_failure() {
        let mut pipeline = build_pipeline().await;
        pipeline = pipeline.with_physics_sim(Arc::new(StubSimEngine {
            class_id: "physics".to_string(),
            update_status: Status::failed("physics exploded"),
        }));
        pipeline = pipeline.with_rendering_sim(Arc::new(StubSimEngine {
            class_id: "rendering".to_string(),
            update_status: Status::success(),
        }));
        pipeline.init().await.unwrap();

        let mut action = CombinedRobotAction::new("nav");
        action.actions.insert(
            "base".to_string(),
            vec![crate::model::RobotAction::nav3d(crate::model::Pose::identity(), 1.0)],
        );

        let status = pipeline.call_environment_update_pipeline(action).await;
        assert_eq!(status.kind, crate::model::StatusKind::Failed);
    }
}
