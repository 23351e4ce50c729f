//! Scriptable mock adapters shared by this crate's unit tests and the
//! `tests/end_to_end.rs` scenarios, grounded on the dependency crate's
//! `tool_protocol.rs::MockProtocol` pattern: a fixed/canned response,
//! overridable in a single field, plus call counters tests can assert on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::model::{ContactAnnotation, CombinedRobotState, Pose, Quaternion, RobotAction, RobotState, Status};

use super::{AdapterResult, ModelRobot, PhysicalRobot, PhysicalSensor, RobotCombiner, SensorPayload, TransformPair};

/// A queue of canned [`Status`] responses; each `send*`/`abort*` call pops
/// the front, falling back to `Status::success()` once drained.
pub struct ScriptedStatuses(Mutex<VecDeque<Status>>);

impl ScriptedStatuses {
    pub fn new(statuses: impl IntoIterator<Item = Status>) -> Self {
        ScriptedStatuses(Mutex::new(statuses.into_iter().collect()))
    }

    pub fn empty() -> Self {
        ScriptedStatuses(Mutex::new(VecDeque::new()))
    }

    pub fn next(&self) -> Status {
        self.0
            .lock()
            .expect("scripted statuses mutex poisoned")
            .pop_front()
            .unwrap_or_else(Status::success)
    }
}

pub struct MockModelRobot {
    pub configuration: RobotState,
    pub transform_pairs: HashMap<ContactAnnotation, TransformPair>,
}

impl MockModelRobot {
    pub fn new(configuration: RobotState) -> Self {
        MockModelRobot {
            configuration,
            transform_pairs: HashMap::new(),
        }
    }
}

#[async_trait]
impl ModelRobot for MockModelRobot {
    async fn create(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn destroy(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn configuration_for_task(
        &self,
        _task: &str,
        _params: &Value,
        _latest: &RobotState,
    ) -> AdapterResult<RobotState> {
        Ok(self.configuration.clone())
    }

    async fn orientation_transform(
        &self,
        _control_link: &str,
        desired: Quaternion,
        known_pair: Option<TransformPair>,
        _robot_base_orientation: Quaternion,
    ) -> AdapterResult<Quaternion> {
        Ok(known_pair.map(|p| p.apply(desired)).unwrap_or(desired))
    }

    async fn generate_orientation_transform_pair(
        &self,
        _params: &Value,
    ) -> AdapterResult<HashMap<ContactAnnotation, TransformPair>> {
        Ok(self.transform_pairs.clone())
    }
}

/// A physical robot whose `send*` calls pop from [`ScriptedStatuses`] and
/// whose `abort*` calls increment a counter so cancellation tests can
/// assert "no further `send*` was invoked".
#[derive(Default)]
pub struct MockPhysicalRobot {
    pub responses: ScriptedStatuses,
    pub state: RobotState,
    pub send_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub connected: AtomicUsize,
    /// When set, every `send*` call waits on this before consulting
    /// `responses`, letting cancellation tests hold a dispatch open long
    /// enough to race a cancel against it deterministically.
    pub hold: Option<Arc<Notify>>,
}

impl Default for ScriptedStatuses {
    fn default() -> Self {
        ScriptedStatuses::empty()
    }
}

impl Default for RobotState {
    fn default() -> Self {
        RobotState::MobileBase {
            base_pose: Pose::identity(),
        }
    }
}

impl MockPhysicalRobot {
    pub fn new(state: RobotState, responses: ScriptedStatuses) -> Self {
        MockPhysicalRobot {
            responses,
            state,
            send_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            connected: AtomicUsize::new(0),
            hold: None,
        }
    }

    pub fn send_call_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn abort_call_count(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_hold(&self) {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
    }
}

#[async_trait]
impl PhysicalRobot for MockPhysicalRobot {
    async fn connect(&self) -> AdapterResult<()> {
        self.connected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn latest_state(&self) -> AdapterResult<RobotState> {
        Ok(self.state.clone())
    }

    async fn emergency_stop(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn init(&self) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.responses.next()
    }

    async fn send_joint_angles(&self, _goal: &RobotState) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_hold().await;
        self.responses.next()
    }

    async fn abort_joint_angles(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("joint angles aborted")
    }

    async fn send_base_pose(&self, _action: &RobotAction) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_hold().await;
        self.responses.next()
    }

    async fn abort_base_pose(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("base pose aborted")
    }

    async fn send_target_motion(&self, _goals: &[RobotAction]) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_hold().await;
        self.responses.next()
    }

    async fn abort_target_motion(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("target motion aborted")
    }

    async fn send_point_to_motion(&self, _action: &RobotAction) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_hold().await;
        self.responses.next()
    }

    async fn abort_point_to_motion(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("point-to motion aborted")
    }

    async fn send_control_command(&self, _action: &RobotAction) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_hold().await;
        self.responses.next()
    }

    async fn abort_control_command(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("control command aborted")
    }
}

/// A physical sensor whose scenery/physics replies are scripted via a
/// queue of `(Status, Value)` pairs.
#[derive(Default)]
pub struct MockPhysicalSensor {
    pub scenery_replies: Mutex<VecDeque<(Status, SensorPayload)>>,
    pub physics_replies: Mutex<VecDeque<(Status, SensorPayload)>>,
}

impl MockPhysicalSensor {
    pub fn with_scenery(replies: impl IntoIterator<Item = (Status, SensorPayload)>) -> Self {
        MockPhysicalSensor {
            scenery_replies: Mutex::new(replies.into_iter().collect()),
            physics_replies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_physics(replies: impl IntoIterator<Item = (Status, SensorPayload)>) -> Self {
        MockPhysicalSensor {
            scenery_replies: Mutex::new(VecDeque::new()),
            physics_replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PhysicalSensor for MockPhysicalSensor {
    async fn connect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn get_physics_state(&self, _cmd: &str, _data: &Value) -> (Status, SensorPayload) {
        self.physics_replies
            .lock()
            .expect("mutex poisoned")
            .pop_front()
            .unwrap_or((Status::success(), Value::Null))
    }

    async fn get_scenery_state(&self, _cmd: &str, _data: &Value) -> (Status, SensorPayload) {
        self.scenery_replies
            .lock()
            .expect("mutex poisoned")
            .pop_front()
            .unwrap_or((Status::success(), Value::Null))
    }
}

/// A combiner that always returns a fixed id/name, for configurations
/// where the kinematics engine cannot resolve a unique candidate itself.
pub struct MockRobotCombiner {
    pub end_effector_id: String,
    pub sensor_id: String,
    pub recognition_method: String,
}

#[async_trait]
impl RobotCombiner for MockRobotCombiner {
    async fn set_end_effector_robot(&self, _task: &str, _params: &Value) -> AdapterResult<String> {
        Ok(self.end_effector_id.clone())
    }

    async fn set_sensor(
        &self,
        _sensor_type: &str,
        _task: &str,
        _params: &Value,
    ) -> AdapterResult<String> {
        Ok(self.sensor_id.clone())
    }

    async fn set_multiple_end_effector_robots(
        &self,
        _task: &str,
        _params: &Value,
    ) -> AdapterResult<Vec<String>> {
        Ok(vec![self.end_effector_id.clone()])
    }

    async fn task_transform(
        &self,
        _task: &str,
        _params: &Value,
        _states: &CombinedRobotState,
    ) -> AdapterResult<HashMap<String, HashMap<String, Pose>>> {
        Ok(HashMap::new())
    }

    async fn recognition_method(&self, _task: &str, _params: &Value) -> AdapterResult<String> {
        Ok(self.recognition_method.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_statuses_fall_back_to_success_once_drained() {
        let scripted = ScriptedStatuses::new(vec![Status::failed("first")]);
        assert_eq!(scripted.next().kind, crate::model::StatusKind::Failed);
        assert_eq!(scripted.next().kind, crate::model::StatusKind::Success);
    }

    #[tokio::test]
    async fn mock_physical_robot_counts_sends_and_aborts() {
        let robot = MockPhysicalRobot::new(RobotState::default(), ScriptedStatuses::empty());
        robot.send_joint_angles(&RobotState::default()).await;
        robot.abort_joint_angles().await;
        assert_eq!(robot.send_call_count(), 1);
        assert_eq!(robot.abort_call_count(), 1);
    }
}
