//! The kinematics engine: topology registry, focus-selection helpers,
//! per-robot action log, and orientation-frame translation (§4.C).
//!
//! Per §9's redesign note, `end_effector_id`/`sensor_ids` are **not**
//! mutable fields here — the registry is immutable after [`KinematicsEngine::new`]
//! and focus state lives in the caller-threaded `ExecutionContext`
//! (see [`crate::skill::ExecutionContext`]). This engine only answers "which
//! id should be selected" and "what's the current translated orientation";
//! it never remembers the answer itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::{ModelRobot, PhysicalSensor, RobotCombiner, TransformPair};
use crate::config::RobotStructureConfig;
use crate::error::RuntimeError;
use crate::model::{CombinedRobotAction, ContactAnnotation, Quaternion, RobotAction, SolveByType};
use crate::registry::Registry;
use crate::topology::{self, RobotRole};

/// One flattened robot registry entry, per §3 "Robot registry".
pub struct RobotRegistryEntry {
    pub role: RobotRole,
    pub parent_id: Option<String>,
    pub parent_link: String,
    pub sensor_type: Option<String>,
    pub model: Option<Arc<dyn ModelRobot>>,
}

/// The rooted tree of robots, built once at init and read-only afterward.
pub struct RobotRegistry {
    pub entries: HashMap<String, RobotRegistryEntry>,
    pub base_id: String,
    /// First end-effector/tool seen at init; purely a starting hint. The
    /// session-scoped "current" focus lives in `ExecutionContext`, not here.
    pub initial_end_effector_id: Option<String>,
}

impl RobotRegistry {
    pub fn build(
        structure: &RobotStructureConfig,
        model_registry: &Registry<Arc<dyn ModelRobot>>,
    ) -> Result<RobotRegistry, RuntimeError> {
        let flat = topology::flatten_structure(structure)?;
        let base_id = topology::select_base_id(&flat)?;

        let initial_end_effector_id = flat
            .iter()
            .find(|n| n.role.is_end_effector_like())
            .map(|n| n.id.clone());

        let mut entries = HashMap::new();
        for node in flat {
            let model = match &node.model_robot {
                Some(name) => Some(model_registry.resolve(name, &serde_json::Value::Null)?),
                None => None,
            };
            entries.insert(
                node.id,
                RobotRegistryEntry {
                    role: node.role,
                    parent_id: node.parent_id,
                    parent_link: node.parent_link,
                    sensor_type: node.sensor_type,
                    model,
                },
            );
        }

        Ok(RobotRegistry {
            entries,
            base_id,
            initial_end_effector_id,
        })
    }

    pub fn end_effector_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.role.is_end_effector_like())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn sensor_ids(&self, sensor_type: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.role == RobotRole::Sensor && e.sensor_type.as_deref() == Some(sensor_type)
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Connected `physical_sensor` adapters, keyed by robot id, built by
/// walking the same topology tree as [`RobotRegistry`]/`ControllerEngine`
/// (§4.C "Focus selection" consults this to read a selected sensor once
/// [`KinematicsEngine::select_sensor`] has named its id).
pub struct SensorManager {
    sensors: HashMap<String, Arc<dyn PhysicalSensor>>,
}

impl SensorManager {
    pub async fn build(
        structure: &RobotStructureConfig,
        sensor_registry: &Registry<Arc<dyn PhysicalSensor>>,
    ) -> Result<SensorManager, RuntimeError> {
        let flat = topology::flatten_structure(structure)?;

        let mut sensors = HashMap::new();
        let mut connected: Vec<(String, Arc<dyn PhysicalSensor>)> = Vec::new();

        for node in &flat {
            let Some(name) = &node.physical_sensor else {
                continue;
            };
            let sensor = sensor_registry.resolve(name, &serde_json::Value::Null)?;
            if let Err(e) = sensor.connect().await {
                for (id, already) in connected.iter().rev() {
                    log::warn!("rolling back connect: disconnecting sensor '{}'", id);
                    let _ = already.disconnect().await;
                }
                return Err(RuntimeError::Adapter {
                    id: node.id.clone(),
                    source: e.to_string(),
                });
            }
            connected.push((node.id.clone(), sensor.clone()));
            sensors.insert(node.id.clone(), sensor);
        }

        Ok(SensorManager { sensors })
    }

    pub fn get(&self, robot_id: &str) -> Option<Arc<dyn PhysicalSensor>> {
        self.sensors.get(robot_id).cloned()
    }

    pub async fn close(&self) {
        for (id, sensor) in &self.sensors {
            if let Err(e) = sensor.disconnect().await {
                log::warn!("sensor '{}' disconnect failed: {}", id, e);
            }
        }
    }
}

/// Per-robot memory of the *previous* step's dispatched actions, keyed by
/// `SolveByType` — deliberately non-historical (§9).
#[derive(Default)]
pub struct RobotActionLog {
    pub by_type: HashMap<SolveByType, Vec<RobotAction>>,
    pub most_latest_action_types: Vec<SolveByType>,
}

impl RobotActionLog {
    fn reset(&mut self) {
        self.most_latest_action_types = vec![SolveByType::Null];
    }
}

pub struct KinematicsEngine {
    pub registry: RobotRegistry,
    action_logs: HashMap<String, RobotActionLog>,
    transform_pairs: HashMap<(String, ContactAnnotation), TransformPair>,
}

impl KinematicsEngine {
    pub fn new(registry: RobotRegistry) -> Self {
        let action_logs = registry
            .entries
            .keys()
            .map(|id| (id.clone(), RobotActionLog::default()))
            .collect();
        KinematicsEngine {
            registry,
            action_logs,
            transform_pairs: HashMap::new(),
        }
    }

    pub async fn select_end_effector(
        &self,
        task: &str,
        params: &serde_json::Value,
        combiner: &dyn RobotCombiner,
    ) -> Result<String, RuntimeError> {
        let candidates = self.registry.end_effector_ids();
        if candidates.len() == 1 {
            return Ok(candidates[0].to_string());
        }
        combiner
            .set_end_effector_robot(task, params)
            .await
            .map_err(|e| RuntimeError::Adapter {
                id: "combiner".to_string(),
                source: e.to_string(),
            })
    }

    pub async fn select_sensor(
        &self,
        sensor_type: &str,
        task: &str,
        params: &serde_json::Value,
        combiner: &dyn RobotCombiner,
    ) -> Result<String, RuntimeError> {
        let candidates = self.registry.sensor_ids(sensor_type);
        if candidates.len() == 1 {
            return Ok(candidates[0].to_string());
        }
        combiner
            .set_sensor(sensor_type, task, params)
            .await
            .map_err(|e| RuntimeError::Adapter {
                id: "combiner".to_string(),
                source: e.to_string(),
            })
    }

    /// §4.C "Update pass": bookkeeps and copies through a `CombinedRobotAction`,
    /// warning (non-fatally) on duplicate FK/Nav/Init goals for one robot in
    /// one step, then refreshes the action log.
    pub fn update(&mut self, action: &CombinedRobotAction) -> CombinedRobotAction {
        log::debug!(
            "kinematics update task={} robots={}",
            action.task,
            action.actions.len()
        );

        for log_entry in self.action_logs.values_mut() {
            log_entry.reset();
        }

        let mut out = CombinedRobotAction::new(action.task.clone());

        for (robot_id, actions) in &action.actions {
            let mut counts: HashMap<SolveByType, usize> = HashMap::new();
            let mut types_this_step: Vec<SolveByType> = Vec::new();

            for a in actions {
                let t = a.solve_by_type();
                *counts.entry(t).or_insert(0) += 1;
                if !types_this_step.contains(&t) {
                    types_this_step.push(t);
                }
                out.actions.entry(robot_id.clone()).or_default().push(a.clone());
            }

            for watched in [SolveByType::Fk, SolveByType::Nav3D, SolveByType::InitRobot] {
                if counts.get(&watched).copied().unwrap_or(0) > 1 {
                    log::warn!(
                        "robot '{}' received {} duplicate {:?} goals in one step",
                        robot_id,
                        counts[&watched],
                        watched
                    );
                }
            }

            let log_entry = self.action_logs.entry(robot_id.clone()).or_default();
            log_entry.most_latest_action_types = types_this_step.clone();
            for t in types_this_step {
                if t == SolveByType::Null {
                    continue;
                }
                let this_step: Vec<RobotAction> =
                    actions.iter().filter(|a| a.solve_by_type() == t).cloned().collect();
                log_entry.by_type.insert(t, this_step);
            }
        }

        log::trace!(
            "action log sizes after update: {:?}",
            self.action_logs
                .iter()
                .map(|(id, l)| (id.clone(), l.by_type.len()))
                .collect::<Vec<_>>()
        );

        out
    }

    pub fn latest_action_types(&self, robot_id: &str) -> &[SolveByType] {
        self.action_logs
            .get(robot_id)
            .map(|l| l.most_latest_action_types.as_slice())
            .unwrap_or(&[])
    }

    pub fn latest_actions_of_type(&self, robot_id: &str, t: SolveByType) -> Option<&[RobotAction]> {
        self.action_logs
            .get(robot_id)
            .and_then(|l| l.by_type.get(&t))
            .map(|v| v.as_slice())
    }

    /// Latches a dynamic `{annotation: pair}` table for `robot_id` at grasp
    /// time, merging into the existing table rather than replacing it.
    pub async fn generate_orientation_transform_pair(
        &mut self,
        robot_id: &str,
        params: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let model = self
            .registry
            .entries
            .get(robot_id)
            .and_then(|e| e.model.clone())
            .ok_or_else(|| RuntimeError::UnknownParent {
                id: robot_id.to_string(),
                parent_id: String::new(),
            })?;
        let pairs = model
            .generate_orientation_transform_pair(params)
            .await
            .map_err(|e| RuntimeError::Adapter {
                id: robot_id.to_string(),
                source: e.to_string(),
            })?;
        for (annotation, pair) in pairs {
            self.transform_pairs.insert((robot_id.to_string(), annotation), pair);
        }
        Ok(())
    }

    /// Translates `desired` (standard basis) into `robot_id`'s gripper basis
    /// for `annotation`'s control link, preferring a latched dynamic pair and
    /// falling back to the model's static transform.
    pub async fn get_orientation_transform(
        &self,
        robot_id: &str,
        control_link: &str,
        annotation: &ContactAnnotation,
        desired: Quaternion,
        robot_base_orientation: Quaternion,
    ) -> Result<Quaternion, RuntimeError> {
        if let Some(pair) = self
            .transform_pairs
            .get(&(robot_id.to_string(), annotation.clone()))
        {
            return Ok(pair.apply(desired));
        }
        let model = self
            .registry
            .entries
            .get(robot_id)
            .and_then(|e| e.model.clone())
            .ok_or_else(|| RuntimeError::UnknownParent {
                id: robot_id.to_string(),
                parent_id: String::new(),
            })?;
        model
            .orientation_transform(control_link, desired, None, robot_base_orientation)
            .await
            .map_err(|e| RuntimeError::Adapter {
                id: robot_id.to_string(),
                source: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockModelRobot;
    use crate::model::{Pose, RobotState};

    fn model_registry() -> Registry<Arc<dyn ModelRobot>> {
        let mut registry: Registry<Arc<dyn ModelRobot>> = Registry::new("model_robot");
        registry.register("base_model", |_| {
            Ok(Arc::new(MockModelRobot::new(RobotState::MobileBase {
                base_pose: Pose::identity(),
            })) as Arc<dyn ModelRobot>)
        });
        registry.register("arm_model", |_| {
            Ok(Arc::new(MockModelRobot::new(RobotState::Manipulator {
                joints: crate::model::JointState::empty(),
                base_pose: Pose::identity(),
            })) as Arc<dyn ModelRobot>)
        });
        registry
    }

    fn sample_structure() -> RobotStructureConfig {
        let json = serde_json::json!({
            "combiner": "default",
            "models": [{
                "mobile_base": {
                    "unique_id": "base",
                    "parent_link": "",
                    "model_robot": "base_model",
                    "childs": [{
                        "manipulator": {
                            "unique_id": "arm",
                            "parent_link": "base_link",
                            "model_robot": "arm_model"
                        }
                    }, {
                        "sensor": {
                            "unique_id": "cam",
                            "parent_link": "arm_link",
                            "sensor_type": "CAMERA_3D"
                        }
                    }]
                }
            }]
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn builds_registry_with_one_root() {
        let registry = RobotRegistry::build(&sample_structure(), &model_registry()).unwrap();
        assert_eq!(registry.base_id, "base");
        assert!(registry.entries["base"].parent_id.is_none());
        assert_eq!(registry.entries["arm"].parent_id.as_deref(), Some("base"));
    }

    #[test]
    fn orphan_sensor_at_top_level_is_rejected() {
        let json = serde_json::json!({
            "combiner": "default",
            "models": [{
                "sensor": {"unique_id": "cam", "parent_link": ""}
            }]
        });
        let structure: RobotStructureConfig = serde_json::from_value(json).unwrap();
        let err = RobotRegistry::build(&structure, &model_registry()).unwrap_err();
        assert!(matches!(err, RuntimeError::OrphanSensor { .. }));
    }

    #[test]
    fn update_resets_uncommanded_robots_to_null() {
        let registry = RobotRegistry::build(&sample_structure(), &model_registry()).unwrap();
        let mut engine = KinematicsEngine::new(registry);

        let mut action = CombinedRobotAction::new("test");
        action
            .actions
            .insert("arm".to_string(), vec![RobotAction::InitRobot]);
        engine.update(&action);

        assert_eq!(
            engine.latest_action_types("arm"),
            &[SolveByType::InitRobot]
        );
        assert_eq!(engine.latest_action_types("base"), &[SolveByType::Null]);
        assert_eq!(engine.latest_action_types("cam"), &[SolveByType::Null]);
    }

    #[test]
    fn update_replaces_rather_than_appends_log_for_a_type() {
        let registry = RobotRegistry::build(&sample_structure(), &model_registry()).unwrap();
        let mut engine = KinematicsEngine::new(registry);

        let mut first = CombinedRobotAction::new("t1");
        first.actions.insert(
            "arm".to_string(),
            vec![RobotAction::ik(Pose::identity(), vec!["wrist".into()])],
        );
        engine.update(&first);
        assert_eq!(
            engine.latest_actions_of_type("arm", SolveByType::Ik).unwrap().len(),
            1
        );

        let mut second = CombinedRobotAction::new("t2");
        second.actions.insert(
            "arm".to_string(),
            vec![
                RobotAction::ik(Pose::identity(), vec!["wrist".into()]),
                RobotAction::ik(Pose::identity(), vec!["wrist".into()]),
            ],
        );
        engine.update(&second);
        assert_eq!(
            engine.latest_actions_of_type("arm", SolveByType::Ik).unwrap().len(),
            2
        );
    }
}
