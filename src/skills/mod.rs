//! Built-in skill library (§4.J): one source file per skill, mirroring the
//! dependency crate's `tools/{bash,calculator,filesystem,...}.rs` layout.
//!
//! Every skill registers under a plain name in both the skill and decoder
//! registries; a `library` entry in configuration then maps a tree node's
//! `Node` name (e.g. `"GRASP"`) to a `src`/`decoder` pair. Skill/decoder
//! instances are stateful across one invocation (trajectory progress,
//! decoded parameters) but hold nothing across invocations, so each
//! factory below simply produces a fresh `default()`.

mod bring;
mod find;
mod grasp;
mod look;
mod navigation;
mod pick;
mod place;
mod prepare;
mod release;

use std::sync::Arc;

use crate::registry::Registry;
use crate::skill::{Skill, SkillDecoder};

/// Registers every built-in skill/decoder pair under its canonical name.
/// Callers still need a `library` map in configuration pointing tree node
/// names (`"PREPARE"`, `"FIND"`, ...) at these registered names.
pub fn register_builtin_skills(
    skills: &mut Registry<Box<dyn Skill>>,
    decoders: &mut Registry<Box<dyn SkillDecoder>>,
) {
    skills.register("prepare", |_| Ok(Box::new(prepare::PrepareSkill::default()) as Box<dyn Skill>));
    decoders.register("prepare", |_| Ok(Box::new(prepare::PrepareDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("find", |_| Ok(Box::new(find::FindSkill::default()) as Box<dyn Skill>));
    decoders.register("find", |_| Ok(Box::new(find::FindDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("look", |_| Ok(Box::new(look::LookSkill::default()) as Box<dyn Skill>));
    decoders.register("look", |_| Ok(Box::new(look::LookDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("grasp", |_| Ok(Box::new(grasp::GraspSkill::default()) as Box<dyn Skill>));
    decoders.register("grasp", |_| Ok(Box::new(grasp::GraspDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("pick", |_| Ok(Box::new(pick::PickSkill::default()) as Box<dyn Skill>));
    decoders.register("pick", |_| Ok(Box::new(pick::PickDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("bring", |_| Ok(Box::new(bring::BringSkill::default()) as Box<dyn Skill>));
    decoders.register("bring", |_| Ok(Box::new(bring::BringDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("place", |_| Ok(Box::new(place::PlaceSkill::default()) as Box<dyn Skill>));
    decoders.register("place", |_| Ok(Box::new(place::PlaceDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("release", |_| Ok(Box::new(release::ReleaseSkill::default()) as Box<dyn Skill>));
    decoders.register("release", |_| Ok(Box::new(release::ReleaseDecoder::default()) as Box<dyn SkillDecoder>));

    skills.register("navigation", |_| Ok(Box::new(navigation::NavigationSkill::default()) as Box<dyn Skill>));
    decoders.register("navigation", |_| {
        Ok(Box::new(navigation::NavigationDecoder::default()) as Box<dyn SkillDecoder>)
    });
}

/// Shared helper: a JSON string field that may be a literal or a
/// `{blackboard_key}` reference, resolved against the board at decode
/// time. Several skills (`look`, `grasp`, `bring`) accept this shape for
/// one or more parameters.
pub(crate) fn resolve_value(board: &crate::blackboard::Blackboard, raw: &serde_json::Value) -> serde_json::Value {
    match raw.as_str().and_then(|s| board.resolve_reference(s)) {
        Some(resolved) => resolved,
        None => raw.clone(),
    }
}

/// Parses a direction given as either `{x,y,z}` or `[x,y,z]`, falling back
/// to `default` per-axis when a component or array slot is absent. The
/// external interface sends directions as arrays (`detach=[0,0,0.1]`); the
/// object form is kept for callers that build params programmatically.
pub(crate) fn parse_xyz_or(value: Option<&serde_json::Value>, default: (f64, f64, f64)) -> (f64, f64, f64) {
    use serde_json::Value;
    match value {
        Some(Value::Array(arr)) => (
            arr.first().and_then(Value::as_f64).unwrap_or(default.0),
            arr.get(1).and_then(Value::as_f64).unwrap_or(default.1),
            arr.get(2).and_then(Value::as_f64).unwrap_or(default.2),
        ),
        Some(v) => (
            v.get("x").and_then(Value::as_f64).unwrap_or(default.0),
            v.get("y").and_then(Value::as_f64).unwrap_or(default.1),
            v.get("z").and_then(Value::as_f64).unwrap_or(default.2),
        ),
        None => default,
    }
}

/// Parses a point given as either `{x,y,z}` or `[x,y,z]`; `None` if either
/// form is missing a component.
pub(crate) fn parse_xyz_point(value: &serde_json::Value) -> Option<(f64, f64, f64)> {
    use serde_json::Value;
    match value {
        Value::Array(arr) => Some((arr.first()?.as_f64()?, arr.get(1)?.as_f64()?, arr.get(2)?.as_f64()?)),
        v => Some((v.get("x")?.as_f64()?, v.get("y")?.as_f64()?, v.get("z")?.as_f64()?)),
    }
}

pub(crate) fn combiner_or_failed(
    pipeline: &crate::pipeline::EnginePipeline,
) -> Result<Arc<dyn crate::adapters::RobotCombiner>, crate::model::Status> {
    pipeline
        .combiner()
        .ok_or_else(|| crate::model::Status::unexpected("no robot combiner attached to the engine pipeline"))
}
