//! The controller engine: parallel per-robot command dispatch, abort
//! fan-out, and emergency stop (§4.D).
//!
//! The dispatch group is a [`tokio::task::JoinSet`] (one task per robot),
//! grounded on the dependency crate's `execute_parallel` shape (spawn N
//! tasks, collect `(id, result)` pairs, await all before returning).
//! Cancellation is a [`tokio_util::sync::CancellationToken`] stored as the
//! "active dispatch handle"; `tokio::select!` inside each spawned task
//! races the adapter `send*` future against `token.cancelled()`.
//! `emergency_stop_request` is a plain `AtomicBool` read by the dispatch
//! loop between `select!` branches, since it is shared across tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::adapters::PhysicalRobot;
use crate::config::RobotStructureConfig;
use crate::error::RuntimeError;
use crate::model::{CombinedRobotAction, CombinedRobotState, RobotAction, SolveByType, Status};
use crate::registry::Registry;
use crate::topology;

pub struct ControllerEngine {
    adapters: HashMap<String, Arc<dyn PhysicalRobot>>,
    latest_state: AsyncMutex<CombinedRobotState>,
    active_dispatch: StdMutex<Option<CancellationToken>>,
    emergency_stop_request: AtomicBool,
}

async fn dispatch_one(adapter: Arc<dyn PhysicalRobot>, actions: Vec<RobotAction>) -> Status {
    match actions.first().map(RobotAction::solve_by_type) {
        Some(SolveByType::Fk) => match &actions[0] {
            RobotAction::FkAction { goal } => adapter.send_joint_angles(goal).await,
            _ => Status::unexpected("FK dispatch saw a non-FK first action"),
        },
        Some(SolveByType::Nav3D) => adapter.send_base_pose(&actions[0]).await,
        Some(SolveByType::Ik) => adapter.send_target_motion(&actions).await,
        Some(SolveByType::PointTo) => adapter.send_point_to_motion(&actions[0]).await,
        Some(SolveByType::Command) => adapter.send_control_command(&actions[0]).await,
        Some(SolveByType::InitRobot) => adapter.init().await,
        Some(SolveByType::Null) | None => Status::success(),
    }
}

async fn abort_one(adapter: Arc<dyn PhysicalRobot>, first_type: SolveByType) -> Status {
    match first_type {
        SolveByType::Fk => adapter.abort_joint_angles().await,
        SolveByType::Nav3D => adapter.abort_base_pose().await,
        SolveByType::Ik => adapter.abort_target_motion().await,
        SolveByType::PointTo => adapter.abort_point_to_motion().await,
        SolveByType::Command => adapter.abort_control_command().await,
        SolveByType::InitRobot | SolveByType::Null => Status::success(),
    }
}

impl ControllerEngine {
    /// Walks the topology tree, instantiates a `physical_robot` adapter for
    /// every node that carries one, and connects each. Short-circuits and
    /// disconnects everything already connected on the first failure.
    pub async fn init(
        structure: &RobotStructureConfig,
        adapter_registry: &Registry<Arc<dyn PhysicalRobot>>,
    ) -> Result<ControllerEngine, RuntimeError> {
        let flat = topology::flatten_structure(structure)?;

        let mut adapters = HashMap::new();
        let mut connected: Vec<(String, Arc<dyn PhysicalRobot>)> = Vec::new();

        for node in &flat {
            let Some(name) = &node.physical_robot else {
                continue;
            };
            let adapter = adapter_registry.resolve(name, &serde_json::Value::Null)?;
            if let Err(e) = adapter.connect().await {
                for (id, already) in connected.iter().rev() {
                    log::warn!("rolling back connect: disconnecting '{}'", id);
                    let _ = already.disconnect().await;
                }
                return Err(RuntimeError::Adapter {
                    id: node.id.clone(),
                    source: e.to_string(),
                });
            }
            connected.push((node.id.clone(), adapter.clone()));
            adapters.insert(node.id.clone(), adapter);
        }

        Ok(ControllerEngine {
            adapters,
            latest_state: AsyncMutex::new(CombinedRobotState::empty()),
            active_dispatch: StdMutex::new(None),
            emergency_stop_request: AtomicBool::new(false),
        })
    }

    /// Disconnects every adapter in parallel, for engine-pipeline teardown.
    pub async fn close(&self) {
        let mut join_set = JoinSet::new();
        for adapter in self.adapters.values().cloned() {
            join_set.spawn(async move {
                if let Err(e) = adapter.disconnect().await {
                    log::warn!("adapter disconnect failed: {}", e);
                }
            });
        }
        while join_set.join_next().await.is_some() {}
    }

    pub fn has_active_dispatch(&self) -> bool {
        self.active_dispatch.lock().expect("active dispatch mutex poisoned").is_some()
    }

    /// Cancels the in-flight dispatch, if any. Returns `false` if nothing
    /// was active (the "bad timing, retry" case of §4.F's cancel semantics).
    pub fn cancel_active_dispatch(&self) -> bool {
        if let Some(token) = self.active_dispatch.lock().expect("mutex poisoned").as_ref() {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn set_emergency_stop_request(&self) {
        self.emergency_stop_request.store(true, Ordering::SeqCst);
    }

    pub fn clear_emergency_stop_request(&self) {
        self.emergency_stop_request.store(false, Ordering::SeqCst);
    }

    pub fn emergency_stop_requested(&self) -> bool {
        self.emergency_stop_request.load(Ordering::SeqCst)
    }

    /// Dispatches `action` by the "first action's `SolveByType`" convention
    /// (§4.D), fans out concurrently, and on cancellation either returns
    /// `Aborted` immediately (emergency stop in progress) or runs the
    /// matching `abort*` on every dispatched robot first.
    pub async fn update(&self, action: &CombinedRobotAction) -> Status {
        let token = CancellationToken::new();
        *self.active_dispatch.lock().expect("mutex poisoned") = Some(token.clone());

        let mut join_set: JoinSet<(String, Status, bool)> = JoinSet::new();
        let mut dispatched: Vec<(String, SolveByType)> = Vec::new();

        for (robot_id, actions) in &action.actions {
            if actions.is_empty() {
                continue;
            }
            let Some(adapter) = self.adapters.get(robot_id).cloned() else {
                log::warn!("no adapter registered for robot '{}', skipping dispatch", robot_id);
                continue;
            };
            let first_type = actions[0].solve_by_type();
            dispatched.push((robot_id.clone(), first_type));

            let actions = actions.clone();
            let robot_id = robot_id.clone();
            let token = token.clone();
            join_set.spawn(async move {
                tokio::select! {
                    status = dispatch_one(adapter, actions) => (robot_id, status, false),
                    _ = token.cancelled() => (robot_id, Status::aborted("dispatch cancelled"), true),
                }
            });
        }

        let mut combined = Status::success();
        let mut any_cancelled = false;
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((id, status, cancelled)) => {
                    if cancelled {
                        any_cancelled = true;
                    } else {
                        combined = combined.fold(status.clone());
                    }
                    log::debug!("dispatch result for '{}': {:?}", id, status.kind);
                }
                Err(join_err) => {
                    log::error!("controller dispatch task join error: {}", join_err);
                    combined = combined.fold(Status::unexpected("dispatch task panicked"));
                }
            }
        }

        *self.active_dispatch.lock().expect("mutex poisoned") = None;

        if any_cancelled {
            if self.emergency_stop_requested() {
                return Status::aborted("emergency stop in progress");
            }
            self.abort_dispatched(&dispatched).await;
            return Status::aborted("dispatch cancelled");
        }

        self.update_actual_robot_states().await;
        combined
    }

    async fn abort_dispatched(&self, dispatched: &[(String, SolveByType)]) {
        let mut abort_set: JoinSet<()> = JoinSet::new();
        for (robot_id, first_type) in dispatched {
            let Some(adapter) = self.adapters.get(robot_id).cloned() else {
                continue;
            };
            let first_type = *first_type;
            let robot_id = robot_id.clone();
            abort_set.spawn(async move {
                let status = abort_one(adapter, first_type).await;
                log::debug!("abort result for '{}': {:?}", robot_id, status.kind);
            });
        }
        while abort_set.join_next().await.is_some() {}
    }

    /// Unconditionally fans out `emergencyStop` to every adapter in
    /// parallel, also cancelling any active dispatch and setting the
    /// emergency flag so the dispatch loop skips the normal abort path.
    pub async fn emergency_stop(&self) -> Status {
        self.set_emergency_stop_request();
        self.cancel_active_dispatch();

        let mut join_set: JoinSet<()> = JoinSet::new();
        for adapter in self.adapters.values().cloned() {
            join_set.spawn(async move {
                if let Err(e) = adapter.emergency_stop().await {
                    log::error!("adapter emergency_stop failed: {}", e);
                }
            });
        }
        while join_set.join_next().await.is_some() {}
        Status::success()
    }

    async fn update_actual_robot_states(&self) {
        let mut join_set: JoinSet<(String, Result<crate::model::RobotState, String>)> = JoinSet::new();
        for (id, adapter) in &self.adapters {
            let id = id.clone();
            let adapter = adapter.clone();
            join_set.spawn(async move {
                let result = adapter.latest_state().await.map_err(|e| e.to_string());
                (id, result)
            });
        }

        let mut states = HashMap::new();
        let mut status = Status::success();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((id, Ok(state))) => {
                    states.insert(id, state);
                }
                Ok((id, Err(e))) => {
                    log::warn!("adapter '{}' latest_state failed: {}", id, e);
                    status = status.fold(Status::failed(format!("{}: {}", id, e)));
                }
                Err(join_err) => {
                    log::error!("latest_state join error: {}", join_err);
                    status = status.fold(Status::unexpected("latest_state task panicked"));
                }
            }
        }
        *self.latest_state.lock().await = CombinedRobotState::new(states, status);
    }

    pub async fn latest_state(&self) -> CombinedRobotState {
        self.latest_state.lock().await.clone()
    }

    pub fn robot_ids(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockPhysicalRobot, ScriptedStatuses};
    use crate::model::{Pose, RobotState};

    fn engine_with(adapters: Vec<(&str, Arc<dyn PhysicalRobot>)>) -> ControllerEngine {
        ControllerEngine {
            adapters: adapters.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            latest_state: AsyncMutex::new(CombinedRobotState::empty()),
            active_dispatch: StdMutex::new(None),
            emergency_stop_request: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn update_dispatches_by_first_action_type_and_polls_state() {
        let robot = Arc::new(MockPhysicalRobot::new(
            RobotState::MobileBase { base_pose: Pose::identity() },
            ScriptedStatuses::new(vec![Status::success()]),
        ));
        let engine = engine_with(vec![("base", robot.clone() as Arc<dyn PhysicalRobot>)]);

        let mut action = CombinedRobotAction::new("nav");
        action.actions.insert(
            "base".to_string(),
            vec![RobotAction::nav3d(Pose::identity(), 5.0)],
        );

        let status = engine.update(&action).await;
        assert!(status.is_success());
        assert_eq!(robot.send_call_count(), 1);

        let state = engine.latest_state().await;
        assert_eq!(state.robot_states.len(), 1);
        assert!(state.robot_states.contains_key("base"));
    }

    #[tokio::test]
    async fn every_registered_id_appears_exactly_once_after_poll() {
        let base = Arc::new(MockPhysicalRobot::default());
        let arm = Arc::new(MockPhysicalRobot::default());
        let engine = engine_with(vec![
            ("base", base as Arc<dyn PhysicalRobot>),
            ("arm", arm as Arc<dyn PhysicalRobot>),
        ]);

        engine.update_actual_robot_states().await;
        let state = engine.latest_state().await;
        assert_eq!(state.robot_states.len(), 2);
        assert!(state.robot_states.contains_key("base"));
        assert!(state.robot_states.contains_key("arm"));
    }

    #[tokio::test]
    async fn cancelled_dispatch_runs_abort_unless_emergency() {
        let mut robot = MockPhysicalRobot::default();
        let hold = Arc::new(tokio::sync::Notify::new());
        robot.hold = Some(hold.clone());
        let robot = Arc::new(robot);

        let engine = Arc::new(engine_with(vec![("base", robot.clone() as Arc<dyn PhysicalRobot>)]));

        let mut action = CombinedRobotAction::new("nav");
        action.actions.insert(
            "base".to_string(),
            vec![RobotAction::nav3d(Pose::identity(), 5.0)],
        );

        let dispatch_engine = engine.clone();
        let handle = tokio::spawn(async move { dispatch_engine.update(&action).await });

        for _ in 0..100 {
            if engine.has_active_dispatch() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(engine.has_active_dispatch(), "dispatch never registered itself");

        engine.cancel_active_dispatch();
        // release the held send in case cancellation lost the race, so the
        // spawned task can't hang forever
        hold.notify_waiters();

        let status = handle.await.expect("update task panicked");
        assert_eq!(status.kind, crate::model::StatusKind::Aborted);
        assert_eq!(robot.abort_call_count(), 1);
    }

    #[tokio::test]
    async fn emergency_stop_skips_abort_and_fans_out_to_every_adapter() {
        let robot = Arc::new(MockPhysicalRobot::default());
        let engine = engine_with(vec![("base", robot.clone() as Arc<dyn PhysicalRobot>)]);

        engine.emergency_stop().await;
        assert!(engine.emergency_stop_requested());
    }
}
