//! Configuration data shapes (§6 "Configuration shape"): `serde`-
//! deserializable structs mirroring the JSON exactly. No file I/O, no env
//! var reading, no TOML/YAML parsing happens in this crate — callers parse
//! their own configuration source and hand this crate an already-built
//! [`SessionConfig`] (or a `serde_json::Value` they deserialize into one).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `library`'s per-skill-name entry: the decoder/skill resolver pair plus
/// their static configs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryEntry {
    pub decoder: String,
    #[serde(default)]
    pub decoder_configs: Option<Value>,
    pub src: String,
    #[serde(default)]
    pub src_configs: Option<Value>,
}

/// One `robot_structure.models` tree node. Exactly one role field must be
/// present — callers that build this by hand (rather than via
/// `serde_json`) should still populate exactly one, since the kinematics
/// engine treats more-or-fewer-than-one as `RuntimeError::MalformedNode`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RobotModelNode {
    #[serde(default)]
    pub mobile_base: Option<RobotModelBody>,
    #[serde(default)]
    pub mobile_manipulator: Option<RobotModelBody>,
    #[serde(default)]
    pub manipulator: Option<RobotModelBody>,
    #[serde(default)]
    pub end_effector: Option<RobotModelBody>,
    #[serde(default)]
    pub tool: Option<RobotModelBody>,
    #[serde(default)]
    pub sensor: Option<RobotModelBody>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotModelBody {
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub parent_link: Option<String>,
    #[serde(default)]
    pub model_robot: Option<String>,
    #[serde(default)]
    pub physical_robot: Option<String>,
    #[serde(default)]
    pub physical_sensor: Option<String>,
    /// Distinguishes sensor kinds (e.g. `"CAMERA_3D"`, `"FORCE"`) for
    /// focus-selection filtering; not part of the distilled spec's wire
    /// shape but required for `setSensor(type, ...)` to mean anything.
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub configs: Option<Value>,
    #[serde(default)]
    pub childs: Vec<RobotModelNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotStructureConfig {
    pub combiner: String,
    pub models: Vec<RobotModelNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub engine: String,
    pub class_id: String,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnginesConfig {
    pub kinematics: Option<EngineConfig>,
    pub controller: Option<EngineConfig>,
    #[serde(default)]
    pub data: Option<EngineConfig>,
    #[serde(default)]
    pub world_constructor: Option<EngineConfig>,
    #[serde(default)]
    pub physics_sim: Option<EngineConfig>,
    #[serde(default)]
    pub rendering_sim: Option<EngineConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub general: Value,
    pub library: HashMap<String, LibraryEntry>,
    pub robot_structure: RobotStructureConfig,
    pub engines: EnginesConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_session_config() {
        let json = serde_json::json!({
            "general": {},
            "library": {
                "PREPARE": {"decoder": "passthrough", "src": "prepare"}
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
        });
        let config: SessionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.library.len(), 1);
        assert_eq!(config.robot_structure.models.len(), 1);
    }
}
