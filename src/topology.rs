//! Shared topology flattening: both the kinematics engine (§4.C) and the
//! controller engine (§4.D) walk the same `robot_structure.models` tree —
//! the former resolving each node's `model_robot` name, the latter its
//! `physical_robot`/`physical_sensor` name. This module does the walk and
//! the validation once; each engine then builds its own adapter map from
//! the flattened node list.

use crate::config::{RobotModelBody, RobotModelNode, RobotStructureConfig};
use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotRole {
    MobileBase,
    MobileManipulator,
    Manipulator,
    EndEffector,
    Tool,
    Sensor,
}

impl RobotRole {
    pub fn is_mobile(self) -> bool {
        matches!(self, RobotRole::MobileBase | RobotRole::MobileManipulator)
    }

    pub fn is_end_effector_like(self) -> bool {
        matches!(self, RobotRole::EndEffector | RobotRole::Tool)
    }
}

#[derive(Debug, Clone)]
pub struct FlattenedNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub parent_link: String,
    pub role: RobotRole,
    pub sensor_type: Option<String>,
    pub model_robot: Option<String>,
    pub physical_robot: Option<String>,
    pub physical_sensor: Option<String>,
}

fn role_and_body(node: &RobotModelNode) -> Result<(RobotRole, &RobotModelBody), RuntimeError> {
    let candidates: Vec<(RobotRole, &Option<RobotModelBody>)> = vec![
        (RobotRole::MobileBase, &node.mobile_base),
        (RobotRole::MobileManipulator, &node.mobile_manipulator),
        (RobotRole::Manipulator, &node.manipulator),
        (RobotRole::EndEffector, &node.end_effector),
        (RobotRole::Tool, &node.tool),
        (RobotRole::Sensor, &node.sensor),
    ];
    let present: Vec<(RobotRole, &RobotModelBody)> = candidates
        .into_iter()
        .filter_map(|(role, body)| body.as_ref().map(|b| (role, b)))
        .collect();
    match present.len() {
        1 => Ok(present.into_iter().next().unwrap()),
        0 => Err(RuntimeError::MalformedNode {
            id: "<unknown>".to_string(),
            reason: "node carries no role key".to_string(),
        }),
        n => Err(RuntimeError::MalformedNode {
            id: "<unknown>".to_string(),
            reason: format!("node carries {} role keys, expected exactly one", n),
        }),
    }
}

fn flatten_into(
    node: &RobotModelNode,
    parent_id: Option<&str>,
    out: &mut Vec<FlattenedNode>,
) -> Result<(), RuntimeError> {
    let (role, body) = role_and_body(node)?;
    let id = body.unique_id.clone().ok_or_else(|| RuntimeError::MissingField {
        node: parent_id.unwrap_or("<root>").to_string(),
        field: "unique_id",
    })?;
    let parent_link = body.parent_link.clone().ok_or_else(|| RuntimeError::MissingField {
        node: id.clone(),
        field: "parent_link",
    })?;
    if role != RobotRole::Sensor && body.model_robot.is_none() {
        return Err(RuntimeError::MissingField {
            node: id.clone(),
            field: "model",
        });
    }
    if role == RobotRole::Sensor && parent_id.is_none() {
        return Err(RuntimeError::OrphanSensor { id });
    }

    out.push(FlattenedNode {
        id: id.clone(),
        parent_id: parent_id.map(|s| s.to_string()),
        parent_link,
        role,
        sensor_type: body.sensor_type.clone(),
        model_robot: body.model_robot.clone(),
        physical_robot: body.physical_robot.clone(),
        physical_sensor: body.physical_sensor.clone(),
    });

    for child in &node.childs {
        flatten_into(child, Some(id.as_str()), out)?;
    }
    Ok(())
}

/// Flattens `structure.models` into a rooted list of nodes, applying every
/// init-time rejection rule in §4.C/§3: missing `unique_id`/`parent_link`/
/// `model`, more than one mobile root, an orphan sensor, a malformed node,
/// and an unknown `parent_id` reference.
pub fn flatten_structure(structure: &RobotStructureConfig) -> Result<Vec<FlattenedNode>, RuntimeError> {
    if structure.models.len() != 1 {
        return Err(RuntimeError::MalformedNode {
            id: "<root>".to_string(),
            reason: "robot_structure.models must contain exactly one top-level node".to_string(),
        });
    }

    let mut flat = Vec::new();
    flatten_into(&structure.models[0], None, &mut flat)?;

    let mobile_roots: Vec<&str> = flat
        .iter()
        .filter(|n| n.role.is_mobile())
        .map(|n| n.id.as_str())
        .collect();
    if mobile_roots.len() > 1 {
        return Err(RuntimeError::DuplicateMobileRoot {
            first: mobile_roots[0].to_string(),
            second: mobile_roots[1].to_string(),
        });
    }

    let known_ids: std::collections::HashSet<&str> = flat.iter().map(|n| n.id.as_str()).collect();
    for node in &flat {
        if let Some(parent_id) = &node.parent_id {
            if !known_ids.contains(parent_id.as_str()) {
                return Err(RuntimeError::UnknownParent {
                    id: node.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }
    }

    Ok(flat)
}

/// Selects the base id: the first mobile node, or (with a warning) the
/// first manipulator promoted to base; `Err` if neither exists.
pub fn select_base_id(flat: &[FlattenedNode]) -> Result<String, RuntimeError> {
    if let Some(node) = flat.iter().find(|n| n.role.is_mobile()) {
        return Ok(node.id.clone());
    }
    if let Some(node) = flat.iter().find(|n| n.role == RobotRole::Manipulator) {
        log::warn!("no mobile base present; promoting manipulator '{}' to base", node.id);
        return Ok(node.id.clone());
    }
    Err(RuntimeError::NoBaseCandidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RobotStructureConfig {
        let json = serde_json::json!({
            "combiner": "default",
            "models": [{
                "mobile_base": {
                    "unique_id": "base",
                    "parent_link": "",
                    "model_robot": "base_model",
                    "physical_robot": "base_driver",
                    "childs": [{
                        "sensor": {"unique_id": "cam", "parent_link": "arm_link", "sensor_type": "CAMERA_3D", "physical_sensor": "cam_driver"}
                    }]
                }
            }]
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn flattens_and_selects_base() {
        let flat = flatten_structure(&sample()).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(select_base_id(&flat).unwrap(), "base");
    }

    #[test]
    fn rejects_multiple_top_level_nodes() {
        let json = serde_json::json!({
            "combiner": "default",
            "models": [
                {"mobile_base": {"unique_id": "a", "parent_link": "", "model_robot": "m"}},
                {"mobile_base": {"unique_id": "b", "parent_link": "", "model_robot": "m"}}
            ]
        });
        let structure: RobotStructureConfig = serde_json::from_value(json).unwrap();
        assert!(flatten_structure(&structure).is_err());
    }
}
