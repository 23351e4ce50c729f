//! Wire-level end-to-end scenarios exercising `SessionDriver` the way an
//! embedding application would: build `AdapterRegistries`, `submit` a
//! `setup`/`run`/`abort` sequence, and read back `Response`s off the
//! channel. Mirrors the scenarios catalogued in the specification's
//! testable-properties section — this file covers the ones a caller at the
//! crate boundary (rather than an internal unit test) can observe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use robotree::adapters::mock::{MockModelRobot, MockRobotCombiner};
use robotree::adapters::{AdapterResult, ModelRobot, PhysicalRobot, RobotCombiner};
use robotree::model::{Pose, RobotAction, RobotState, Status, StatusKind};
use robotree::session::{AdapterRegistries, SessionDriver};
use robotree::wire::{Command, Response, ResponseType};

/// A `physical_robot` whose `send_base_pose` blocks until cancelled,
/// notifying `entered` the moment it starts waiting so the test can submit
/// an `abort` only once the dispatch is genuinely in flight rather than
/// guessing at a sleep duration.
struct HoldingRobot {
    entered: Arc<Notify>,
    hold: Notify,
    abort_calls: AtomicUsize,
    send_calls: AtomicUsize,
}

impl HoldingRobot {
    fn new(entered: Arc<Notify>) -> Self {
        HoldingRobot {
            entered,
            hold: Notify::new(),
            abort_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhysicalRobot for HoldingRobot {
    async fn connect(&self) -> AdapterResult<()> {
        Ok(())
    }
    async fn disconnect(&self) -> AdapterResult<()> {
        Ok(())
    }
    async fn latest_state(&self) -> AdapterResult<RobotState> {
        Ok(RobotState::MobileBase { base_pose: Pose::identity() })
    }
    async fn emergency_stop(&self) -> AdapterResult<()> {
        Ok(())
    }
    async fn init(&self) -> Status {
        // Prepare's InitRobot dispatch: resolves immediately so the
        // controller's post-dispatch poll has a robot state to hand
        // Navigation before it ever computes a goal.
        Status::success()
    }
    async fn send_joint_angles(&self, _goal: &RobotState) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn abort_joint_angles(&self) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn send_base_pose(&self, _action: &RobotAction) -> Status {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        // Never notified in this scenario; the controller's cancellation
        // token race (§4.D) drops this future once `abort` lands.
        self.hold.notified().await;
        Status::success()
    }
    async fn abort_base_pose(&self) -> Status {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Status::aborted("base pose aborted")
    }
    async fn send_target_motion(&self, _goals: &[RobotAction]) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn abort_target_motion(&self) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn send_point_to_motion(&self, _action: &RobotAction) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn abort_point_to_motion(&self) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn send_control_command(&self, _action: &RobotAction) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
    async fn abort_control_command(&self) -> Status {
        Status::unexpected("not exercised by this scenario")
    }
}

fn sample_config() -> serde_json::Value {
    json!({
        "general": {},
        "library": {
            "PREPARE": {"decoder": "prepare", "src": "prepare"},
            "NAVIGATION": {"decoder": "navigation", "src": "navigation"}
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

fn navigation_tree() -> serde_json::Value {
    json!({
        "root": { "BehaviorTree": { "ID": "nav-only", "Tree": [
            {"Node": "PREPARE"},
            {"Node": "NAVIGATION", "@mode": "absolute", "@destination": {"position": {"x": 5.0, "y": 0.0, "z": 0.0}}}
        ]}}
    })
}

fn build_registries(robot: Arc<HoldingRobot>) -> AdapterRegistries {
    let mut registries = AdapterRegistries::new();

    registries.model_robot.register("base_model", |_| {
        Ok(Arc::new(MockModelRobot::new(RobotState::MobileBase {
            base_pose: Pose::identity(),
        })) as Arc<dyn ModelRobot>)
    });
    registries.physical_robot.register("base_driver", move |_| {
        Ok(robot.clone() as Arc<dyn PhysicalRobot>)
    });
    registries.combiner.register("default", |_| {
        Ok(Arc::new(MockRobotCombiner {
            end_effector_id: "base".to_string(),
            sensor_id: "base".to_string(),
            recognition_method: "default".to_string(),
        }) as Arc<dyn RobotCombiner>)
    });

    robotree::skills::register_builtin_skills(&mut registries.skill, &mut registries.decoder);
    registries
}

async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<Response>) -> Response {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("response timed out")
        .expect("response channel closed")
}

/// Collects responses until both `setup-1`'s and the named run/abort ids'
/// replies have been seen, since the abort and run responses can arrive in
/// either order (the abort command resolves as soon as the dispatch is
/// cancelled; the run command only resolves once its tree walk unwinds).
async fn collect_by_id(
    rx: &mut mpsc::UnboundedReceiver<Response>,
    mut wanted: Vec<&str>,
) -> std::collections::HashMap<String, Response> {
    let mut seen = std::collections::HashMap::new();
    while !wanted.is_empty() {
        let response = recv_with_timeout(rx).await;
        if let Some(pos) = wanted.iter().position(|id| *id == response.id) {
            wanted.remove(pos);
            seen.insert(response.id.clone(), response);
        }
    }
    seen
}

/// Scenario: "Abort mid-navigation" — run a tree that dispatches Navigation,
/// send `abort(emergency=false)` once the dispatch is genuinely in flight.
/// Expected: `abort_base_pose` called exactly once, the `run` response
/// reports `ABORTED`, and a subsequent `run` is still accepted.
#[tokio::test]
async fn abort_mid_navigation_cancels_dispatch_and_reports_aborted() {
    let entered = Arc::new(Notify::new());
    let robot = Arc::new(HoldingRobot::new(entered.clone()));

    let (driver, mut responses) = SessionDriver::new(build_registries(robot.clone()));
    let _loops = driver.spawn();

    driver.submit(Command::Setup {
        id: "setup-1".to_string(),
        content: sample_config(),
    });
    let setup_response = recv_with_timeout(&mut responses).await;
    assert_eq!(setup_response.status.error_code, StatusKind::Success);

    driver.submit(Command::Run {
        id: "run-1".to_string(),
        content: navigation_tree(),
        node_pointer: None,
    });

    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("navigation never reached send_base_pose");

    driver.submit(Command::Abort {
        id: "abort-1".to_string(),
        emergency: false,
    });

    let responses_by_id = collect_by_id(&mut responses, vec!["run-1", "abort-1"]).await;

    let run_response = &responses_by_id["run-1"];
    assert_eq!(run_response.status.error_code, StatusKind::Aborted);
    assert_eq!(run_response.logs.as_ref().unwrap().node_name, "NAVIGATION");

    let abort_response = &responses_by_id["abort-1"];
    assert!(matches!(abort_response.kind, ResponseType::Abort));
    assert_eq!(abort_response.status.error_code, StatusKind::Success);

    assert_eq!(robot.send_calls.load(Ordering::SeqCst), 1);
    assert_eq!(robot.abort_calls.load(Ordering::SeqCst), 1);

    // A subsequent run is still accepted — the session wasn't left wedged.
    driver.submit(Command::Run {
        id: "run-2".to_string(),
        content: json!({ "root": { "BehaviorTree": { "ID": "noop", "Tree": [] }}}),
        node_pointer: None,
    });
    let second_run = recv_with_timeout(&mut responses).await;
    assert_eq!(second_run.id, "run-2");
    assert_eq!(second_run.status.error_code, StatusKind::Success);
}

/// Scenario: "Emergency stop" — same in-flight dispatch, but
/// `abort(emergency=true)`. Expected: no `abort_base_pose` call (the
/// emergency path bypasses the paired abort and goes straight to
/// `emergencyStop`), and the abort response itself reports success.
#[tokio::test]
async fn emergency_abort_bypasses_paired_abort_call() {
    let entered = Arc::new(Notify::new());
    let robot = Arc::new(HoldingRobot::new(entered.clone()));

    let (driver, mut responses) = SessionDriver::new(build_registries(robot.clone()));
    let _loops = driver.spawn();

    driver.submit(Command::Setup {
        id: "setup-1".to_string(),
        content: sample_config(),
    });
    let _ = recv_with_timeout(&mut responses).await;

    driver.submit(Command::Run {
        id: "run-1".to_string(),
        content: navigation_tree(),
        node_pointer: None,
    });

    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("navigation never reached send_base_pose");

    driver.submit(Command::Abort {
        id: "abort-1".to_string(),
        emergency: true,
    });

    let responses_by_id = collect_by_id(&mut responses, vec!["run-1", "abort-1"]).await;

    let run_response = &responses_by_id["run-1"];
    assert_eq!(run_response.status.error_code, StatusKind::Aborted);

    let abort_response = &responses_by_id["abort-1"];
    assert_eq!(abort_response.status.error_code, StatusKind::Success);

    assert_eq!(robot.abort_calls.load(Ordering::SeqCst), 0);
    assert_eq!(robot.send_calls.load(Ordering::SeqCst), 1);
}
