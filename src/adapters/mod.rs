//! The four adapter traits the runtime consumes: [`ModelRobot`] (kinematic
//! knowledge, no hardware), [`PhysicalRobot`] (the driver), [`PhysicalSensor`]
//! (camera/force sensor I/O), and [`RobotCombiner`] (focus-selection and
//! task-dependent transform policy).
//!
//! Every trait is `#[async_trait] pub trait X: Send + Sync` so adapters can
//! live behind `Arc<dyn X>` in the [`registry`](crate::registry). `send*`/
//! `abort*` pairs return [`Status`] (never a bare `bool`, since the spec's
//! error taxonomy must survive the dispatch boundary);
//! `connect`/`disconnect`/`init` return a boxed error since they are
//! infrastructure calls with no domain-level outcome to report.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{ContactAnnotation, Pose, Quaternion, RobotAction, RobotState, Status};

pub type AdapterError = Box<dyn std::error::Error + Send + Sync>;
pub type AdapterResult<T> = Result<T, AdapterError>;

/// A latched `(standard_basis, gripper_basis)` pair used to translate an
/// orientation goal expressed in the standard description (palm +X, flat
/// +Z-up) into a specific gripper's own basis. Generated dynamically by
/// [`ModelRobot::generate_orientation_transform_pair`] at grasp time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPair {
    pub base: Quaternion,
    pub transform: Quaternion,
}

impl TransformPair {
    /// Applies this pair to move `desired` (in the standard basis) into the
    /// gripper basis: `transform . base^-1 . desired`.
    pub fn apply(&self, desired: Quaternion) -> Quaternion {
        self.transform.mul(&self.base.conjugate()).mul(&desired)
    }
}

/// Kinematic knowledge about a robot model, with no hardware access:
/// predefined postures and orientation-basis translation.
#[async_trait]
pub trait ModelRobot: Send + Sync {
    async fn create(&self) -> AdapterResult<()>;
    async fn destroy(&self) -> AdapterResult<()>;

    /// Returns the predefined posture for `task`, e.g. the `"find"` or
    /// `"bring"` configuration referenced by §4.J's built-in skills.
    async fn configuration_for_task(
        &self,
        task: &str,
        params: &Value,
        latest: &RobotState,
    ) -> AdapterResult<RobotState>;

    /// Translates `desired` (standard basis) into this gripper's own basis
    /// for `control_link`, using `known_pair` if a dynamic pair has already
    /// been latched, else falling back to a static per-model transform.
    /// End-effector models implement this; non-end-effector models can use
    /// the identity default.
    async fn orientation_transform(
        &self,
        control_link: &str,
        desired: Quaternion,
        known_pair: Option<TransformPair>,
        robot_base_orientation: Quaternion,
    ) -> AdapterResult<Quaternion> {
        let _ = (control_link, robot_base_orientation);
        Ok(known_pair.map(|p| p.apply(desired)).unwrap_or(desired))
    }

    /// Generates a `{annotation: pair}` table at grasp time. Default: no
    /// pairs (models without a dynamic basis fall back to the static
    /// transform above).
    async fn generate_orientation_transform_pair(
        &self,
        params: &Value,
    ) -> AdapterResult<HashMap<ContactAnnotation, TransformPair>> {
        let _ = params;
        Ok(HashMap::new())
    }
}

/// A hardware/simulator driver. `send*` resolves with a [`Status`] when the
/// motion completes or fails; cancellation is delivered by cancelling the
/// in-flight `send*` future and invoking the paired `abort*`.
#[async_trait]
pub trait PhysicalRobot: Send + Sync {
    async fn connect(&self) -> AdapterResult<()>;
    async fn disconnect(&self) -> AdapterResult<()>;
    async fn latest_state(&self) -> AdapterResult<RobotState>;
    async fn emergency_stop(&self) -> AdapterResult<()>;

    async fn init(&self) -> Status;

    async fn send_joint_angles(&self, goal: &RobotState) -> Status;
    async fn abort_joint_angles(&self) -> Status;

    async fn send_base_pose(&self, action: &RobotAction) -> Status;
    async fn abort_base_pose(&self) -> Status;

    /// `goals` is the full per-step action list so multi-arm IK goals in
    /// one dispatch are visible together, per §4.D's `sendTargetMotion(list)`.
    async fn send_target_motion(&self, goals: &[RobotAction]) -> Status;
    async fn abort_target_motion(&self) -> Status;

    async fn send_point_to_motion(&self, action: &RobotAction) -> Status;
    async fn abort_point_to_motion(&self) -> Status;

    async fn send_control_command(&self, action: &RobotAction) -> Status;
    async fn abort_control_command(&self) -> Status;

    /// Optional: adapters for end-effectors without a queryable link graph
    /// may omit this.
    async fn get_link_transform(&self, link: &str) -> Option<Pose> {
        let _ = link;
        None
    }
}

/// Raw sensor payload; shape is adapter-specific (camera detections, force
/// readings, ...), carried as an open JSON value since the crate does not
/// prescribe a perception wire format (§1 non-goals).
pub type SensorPayload = Value;

#[async_trait]
pub trait PhysicalSensor: Send + Sync {
    async fn connect(&self) -> AdapterResult<()>;
    async fn disconnect(&self) -> AdapterResult<()>;

    /// 6-axis force/contact sensing, e.g. `place`'s `SurfaceContact` probe.
    async fn get_physics_state(&self, cmd: &str, data: &Value) -> (Status, SensorPayload) {
        let _ = (cmd, data);
        (
            Status::unexpected("sensor does not implement physics state"),
            Value::Null,
        )
    }

    /// 3D camera/recognition sensing, e.g. `find`'s object-pose lookup.
    async fn get_scenery_state(&self, cmd: &str, data: &Value) -> (Status, SensorPayload) {
        let _ = (cmd, data);
        (
            Status::unexpected("sensor does not implement scenery state"),
            Value::Null,
        )
    }
}

/// Policy for focus selection and task-dependent transforms, consulted only
/// when the kinematics engine cannot resolve a unique candidate on its own
/// (§4.C "Focus selection").
#[async_trait]
pub trait RobotCombiner: Send + Sync {
    async fn set_end_effector_robot(&self, task: &str, params: &Value) -> AdapterResult<String>;
    async fn set_sensor(
        &self,
        sensor_type: &str,
        task: &str,
        params: &Value,
    ) -> AdapterResult<String>;
    async fn set_multiple_end_effector_robots(
        &self,
        task: &str,
        params: &Value,
    ) -> AdapterResult<Vec<String>>;

    /// Per-robot, per-frame-pair pose transforms for a task, e.g.
    /// navigation's "vision target + offset → absolute/relative pose".
    async fn task_transform(
        &self,
        task: &str,
        params: &Value,
        states: &crate::model::CombinedRobotState,
    ) -> AdapterResult<HashMap<String, HashMap<String, Pose>>>;

    async fn recognition_method(&self, task: &str, params: &Value) -> AdapterResult<String>;
}

/// Available to this crate's own unit tests, and to external `tests/*.rs`
/// integration tests via the `test-util` feature (enabled on the
/// self-referential dev-dependency in `Cargo.toml`).
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
