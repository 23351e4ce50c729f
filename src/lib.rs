//! `robotree` is a runtime for robots that executes task sequences expressed
//! as hierarchical behavior trees whose leaves are parameterized skills
//! (navigate, find, look, grasp, pick, bring, place, release, prepare).
//!
//! The runtime accepts a declarative tree plus a configuration describing a
//! robot's kinematic topology and plugged-in controllers/sensors, then drives
//! the robot to completion while remaining remotely controllable (run /
//! abort / emergency-stop / reconfigure) over a message channel.
//!
//! It does not parse configuration files, load credentials, produce trees,
//! or talk to hardware directly — those are the caller's job. This crate
//! consumes already-parsed tree JSON and configuration, and an adapter
//! registry supplied by the embedding application.
//!
//! # Layout
//!
//! - [`model`] — the common data model (poses, robot states, actions, status).
//! - [`adapters`] — the four adapter traits the runtime consumes.
//! - [`registry`] — name-string → factory resolution shared by every engine.
//! - [`topology`] — shared robot-structure-tree flattening and validation.
//! - [`kinematics`] — topology registry, focus selection, action log.
//! - [`controller`] — parallel adapter dispatch, abort fan-out, e-stop.
//! - [`pipeline`] — the engine pipeline orchestrator.
//! - [`blackboard`] — the process-scoped variable store.
//! - [`skill`] — the skill/decoder contract and execution loop.
//! - [`interpreter`] — the behavior-tree interpreter.
//! - [`session`] — the session driver (setup/run/abort loops).
//! - [`skills`] — the built-in skill library.
//! - [`error`] — [`RuntimeError`](error::RuntimeError), the configuration/registry error type.
//! - [`wire`] — control-channel message shapes.
//! - [`config`] — configuration data shapes.

pub mod adapters;
pub mod blackboard;
pub mod config;
pub mod controller;
pub mod error;
pub mod interpreter;
pub mod kinematics;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod skill;
pub mod skills;
pub mod topology;
pub mod wire;

pub use blackboard::Blackboard;
pub use error::RuntimeError;
pub use model::{
    CombinedRobotAction, CombinedRobotState, Pose, Quaternion, RobotAction, RobotState, Status,
    StatusKind,
};
pub use session::SessionDriver;
