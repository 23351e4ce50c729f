//! The behavior-tree interpreter (§4.G): a recursive walk over the tree
//! JSON that resolves leaves to skill invocations, applies
//! `Sequence`/`Fallback`/`RetryUntilSuccessful` control-flow, and honors
//! the partial-execution (`start_from_node_id`) and partial-escape
//! (`escape_at_node_id`) path markers.
//!
//! Tree nodes deserialize via a `#[serde(untagged)]` enum, grounded on the
//! Rust behavior-tree libraries in the retrieval pack rather than on the
//! dependency crate (which has no recursive discriminated-union wire
//! format of its own): tagged enums over JSON/string-keyed tree nodes with
//! `Sequence`/`Fallback`/`RetryUntilSuccessful`/leaf `Node` discriminants
//! are the idiomatic shape there. `run_node` is a recursive `async fn`,
//! `Box::pin`-boxed since `async fn` cannot be directly recursive; the
//! node path is compared with the `Ord` derived on the thin [`NodePath`]
//! newtype rather than a raw `Vec<usize>` at comparison sites, to keep the
//! lexicographic intent explicit at call sites.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blackboard::Blackboard;
use crate::config::LibraryEntry;
use crate::error::RuntimeError;
use crate::model::{Status, StatusKind};
use crate::pipeline::EnginePipeline;
use crate::registry::Registry;
use crate::skill::{ExecutionContext, Skill, SkillDecoder, SkillInterface};
use crate::wire::ExecutionLogs;

/// Child index path from the implicit tree root, pushed on entry to
/// `Sequence`/`Fallback`. Compared lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    fn child(&self, index: usize) -> NodePath {
        let mut next = self.0.clone();
        next.push(index);
        NodePath(next)
    }
}

/// One tree node. Exactly one of `Sequence`/`Fallback`/
/// `RetryUntilSuccessful`/`Node` is present on the wire; `serde(untagged)`
/// tries each variant in declaration order, so `Leaf` (whose only
/// requirement is a `"Node"` key) is declared last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Sequence {
        #[serde(rename = "Sequence")]
        children: Vec<TreeNode>,
    },
    Fallback {
        #[serde(rename = "Fallback")]
        children: Vec<TreeNode>,
    },
    RetryUntilSuccessful {
        #[serde(rename = "RetryUntilSuccessful")]
        child: Box<TreeNode>,
    },
    Leaf {
        #[serde(rename = "Node")]
        name: String,
        #[serde(flatten)]
        attrs: HashMap<String, Value>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorTreeBody {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Tree")]
    pub tree: Vec<TreeNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootWrapper {
    #[serde(rename = "BehaviorTree")]
    pub behavior_tree: BehaviorTreeBody,
}

/// `{root: {BehaviorTree: {ID, Tree}}}`, per §6 "Behavior-tree JSON".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorTreeDocument {
    pub root: RootWrapper,
}

const CONDITION_LEAF: &str = "CONDITION";
const CONDITION_VARIABLE_ATTR: &str = "@variable_name";

fn promote_skip(status: Status) -> Status {
    if status.kind == StatusKind::Skipped {
        Status::success()
    } else {
        status
    }
}

/// Mutable run-scoped state threaded through one `run_document` call:
/// the partial-execution markers (consumed as they're reached) and the
/// last-executed-leaf telemetry surfaced in the driver's completion
/// message.
struct RunState {
    start_from: Option<NodePath>,
    escape_at: Option<NodePath>,
    last_node_name: String,
    last_node_path: NodePath,
}

/// Owns the skill/decoder registries and the `library` name → resolver
/// table; stateless otherwise (all per-run state lives in [`RunState`],
/// local to one `run_document` call).
pub struct Interpreter {
    skill_registry: Registry<Box<dyn Skill>>,
    decoder_registry: Registry<Box<dyn SkillDecoder>>,
    library: HashMap<String, LibraryEntry>,
}

impl Interpreter {
    pub fn new(
        skill_registry: Registry<Box<dyn Skill>>,
        decoder_registry: Registry<Box<dyn SkillDecoder>>,
        library: HashMap<String, LibraryEntry>,
    ) -> Self {
        Interpreter {
            skill_registry,
            decoder_registry,
            library,
        }
    }

    /// Runs the whole document (the top-level `Tree` list behaves as an
    /// implicit `Sequence`), then tears down the skill interface and
    /// returns the final status plus last-executed-node telemetry.
    pub async fn run_document(
        &self,
        doc: &BehaviorTreeDocument,
        board: &mut Blackboard,
        env: &mut ExecutionContext,
        pipeline: &mut EnginePipeline,
        skill_interface: &SkillInterface,
        start_from_node_id: Option<Vec<usize>>,
        escape_at_node_id: Option<Vec<usize>>,
    ) -> (Status, ExecutionLogs) {
        let mut state = RunState {
            start_from: start_from_node_id.map(NodePath),
            escape_at: escape_at_node_id.map(NodePath),
            last_node_name: String::new(),
            last_node_path: NodePath::default(),
        };

        let status = self
            .run_sequence(
                &doc.root.behavior_tree.tree,
                NodePath::default(),
                board,
                env,
                pipeline,
                skill_interface,
                &mut state,
            )
            .await;

        skill_interface.cleanup();
        env.release_focus();

        (
            status,
            ExecutionLogs {
                node_name: state.last_node_name,
                node_pointer: state.last_node_path.0,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_node<'b>(
        &'b self,
        node: &'b TreeNode,
        path: NodePath,
        board: &'b mut Blackboard,
        env: &'b mut ExecutionContext,
        pipeline: &'b mut EnginePipeline,
        skill_interface: &'b SkillInterface,
        state: &'b mut RunState,
    ) -> Pin<Box<dyn Future<Output = Status> + Send + 'b>> {
        Box::pin(async move {
            match node {
                TreeNode::Sequence { children } => {
                    self.run_sequence(children, path, board, env, pipeline, skill_interface, state)
                        .await
                }
                TreeNode::Fallback { children } => {
                    self.run_fallback(children, path, board, env, pipeline, skill_interface, state)
                        .await
                }
                TreeNode::RetryUntilSuccessful { child } => {
                    self.run_retry(child, path, board, env, pipeline, skill_interface, state)
                        .await
                }
                TreeNode::Leaf { name, attrs } => {
                    self.run_leaf(name, attrs, path, board, env, pipeline, skill_interface, state)
                        .await
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequence<'b>(
        &'b self,
        children: &'b [TreeNode],
        path: NodePath,
        board: &'b mut Blackboard,
        env: &'b mut ExecutionContext,
        pipeline: &'b mut EnginePipeline,
        skill_interface: &'b SkillInterface,
        state: &'b mut RunState,
    ) -> Pin<Box<dyn Future<Output = Status> + Send + 'b>> {
        Box::pin(async move {
            let mut last = Status::success();
            for (i, child) in children.iter().enumerate() {
                let child_path = path.child(i);
                let status = self
                    .run_node(child, child_path, &mut *board, &mut *env, &mut *pipeline, skill_interface, &mut *state)
                    .await;
                let effective = promote_skip(status);
                let stop = !matches!(effective.kind, StatusKind::Success);
                last = effective;
                if stop {
                    return last;
                }
            }
            last
        })
    }

    /// Stops on `Success | Aborted | Escaped`; if every child fails,
    /// returns `Success` — reproduced exactly as specified (§4.G, §9 open
    /// question), not "corrected" to classical BT semantics.
    #[allow(clippy::too_many_arguments)]
    fn run_fallback<'b>(
        &'b self,
        children: &'b [TreeNode],
        path: NodePath,
        board: &'b mut Blackboard,
        env: &'b mut ExecutionContext,
        pipeline: &'b mut EnginePipeline,
        skill_interface: &'b SkillInterface,
        state: &'b mut RunState,
    ) -> Pin<Box<dyn Future<Output = Status> + Send + 'b>> {
        Box::pin(async move {
            for (i, child) in children.iter().enumerate() {
                let child_path = path.child(i);
                let status = self
                    .run_node(child, child_path, &mut *board, &mut *env, &mut *pipeline, skill_interface, &mut *state)
                    .await;
                let effective = promote_skip(status);
                if matches!(effective.kind, StatusKind::Success | StatusKind::Aborted | StatusKind::Escaped) {
                    return effective;
                }
            }
            Status::success()
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_retry<'b>(
        &'b self,
        child: &'b TreeNode,
        path: NodePath,
        board: &'b mut Blackboard,
        env: &'b mut ExecutionContext,
        pipeline: &'b mut EnginePipeline,
        skill_interface: &'b SkillInterface,
        state: &'b mut RunState,
    ) -> Pin<Box<dyn Future<Output = Status> + Send + 'b>> {
        Box::pin(async move {
            loop {
                let status = self
                    .run_node(child, path.clone(), &mut *board, &mut *env, &mut *pipeline, skill_interface, &mut *state)
                    .await;
                let effective = promote_skip(status);
                match effective.kind {
                    StatusKind::Aborted | StatusKind::Escaped => return effective,
                    StatusKind::Success => return effective,
                    _ => continue,
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_leaf(
        &self,
        name: &str,
        attrs: &HashMap<String, Value>,
        path: NodePath,
        board: &mut Blackboard,
        env: &mut ExecutionContext,
        pipeline: &mut EnginePipeline,
        skill_interface: &SkillInterface,
        state: &mut RunState,
    ) -> Status {
        state.last_node_name = name.to_string();
        state.last_node_path = path.clone();
        log::debug!("interpreter: entering leaf '{}' at {:?}", name, path.0);

        if let Some(start) = &state.start_from {
            if &path < start {
                return Status::skipped();
            }
            state.start_from = None;
        }

        let status = if name == CONDITION_LEAF {
            self.run_condition(attrs, board)
        } else {
            self.run_skill(name, attrs, board, env, pipeline, skill_interface).await
        };

        if status.is_success() {
            if let Some(escape) = &state.escape_at {
                if escape == &path {
                    return Status::escaped();
                }
            }
        }
        status
    }

    fn run_condition(&self, attrs: &HashMap<String, Value>, board: &Blackboard) -> Status {
        let raw = attrs
            .get(CONDITION_VARIABLE_ATTR)
            .and_then(Value::as_str)
            .unwrap_or("");
        let key = raw
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(raw);
        if board.is_truthy(key) {
            Status::success()
        } else {
            Status::failed(format!("condition '{}' is falsy", key))
        }
    }

    async fn run_skill(
        &self,
        name: &str,
        attrs: &HashMap<String, Value>,
        board: &mut Blackboard,
        env: &mut ExecutionContext,
        pipeline: &mut EnginePipeline,
        skill_interface: &SkillInterface,
    ) -> Status {
        let Some(entry) = self.library.get(name) else {
            return Status::unexpected(format!("no library entry registered for skill '{}'", name));
        };

        let skill = match self
            .skill_registry
            .resolve(&entry.src, entry.src_configs.as_ref().unwrap_or(&Value::Null))
        {
            Ok(s) => s,
            Err(e) => return self.resolution_failed("src", &entry.src, e),
        };
        let decoder = match self
            .decoder_registry
            .resolve(&entry.decoder, entry.decoder_configs.as_ref().unwrap_or(&Value::Null))
        {
            Ok(d) => d,
            Err(e) => return self.resolution_failed("decoder", &entry.decoder, e),
        };

        let mut params = entry.decoder_configs.clone().unwrap_or_else(|| Value::Object(Default::default()));
        if let Value::Object(base) = &mut params {
            for (raw_key, value) in attrs {
                let key = raw_key.strip_prefix('@').unwrap_or(raw_key);
                base.insert(key.to_string(), value.clone());
            }
        }

        skill_interface.run(decoder, skill, params, board, env, pipeline).await
    }

    fn resolution_failed(&self, kind: &str, name: &str, err: RuntimeError) -> Status {
        log::error!("interpreter: failed to resolve {} '{}': {}", kind, name, err);
        Status::failed(format!("failed to resolve {} '{}': {}", kind, name, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn leaf(name: &str) -> TreeNode {
        TreeNode::Leaf {
            name: name.to_string(),
            attrs: HashMap::new(),
        }
    }

    fn sequence(children: Vec<TreeNode>) -> TreeNode {
        TreeNode::Sequence { children }
    }

    fn doc(tree: Vec<TreeNode>) -> BehaviorTreeDocument {
        BehaviorTreeDocument {
            root: RootWrapper {
                behavior_tree: BehaviorTreeBody { id: None, tree },
            },
        }
    }

    struct AlwaysSucceedSkill;

    #[async_trait]
    impl Skill for AlwaysSucceedSkill {
        async fn init(
            &mut self,
            _env: &mut ExecutionContext,
            _pipeline: &mut EnginePipeline,
            _params: &Value,
        ) -> Status {
            Status::success()
        }
        async fn get_action(&mut self, _obs: &Value) -> Value {
            serde_json::json!({ "terminate": true })
        }
        fn format_action(&self, _action: &Value) -> crate::model::CombinedRobotAction {
            crate::model::CombinedRobotAction::new("noop")
        }
    }

    struct PassthroughDecoder;

    #[async_trait]
    impl SkillDecoder for PassthroughDecoder {
        async fn decode(&mut self, _params: &Value, _board: &Blackboard) -> Status {
            Status::success()
        }
        async fn fill_runtime_parameters(
            &mut self,
            _board: &Blackboard,
            _env: &ExecutionContext,
            _pipeline: &EnginePipeline,
        ) -> Status {
            Status::success()
        }
        fn as_config(&self) -> Value {
            Value::Null
        }
        fn is_ready_for_execution(&self) -> bool {
            true
        }
    }

    fn interpreter_with_noop() -> Interpreter {
        let mut skill_registry: Registry<Box<dyn Skill>> = Registry::new("skill");
        skill_registry.register("noop", |_| Ok(Box::new(AlwaysSucceedSkill) as Box<dyn Skill>));
        let mut decoder_registry: Registry<Box<dyn SkillDecoder>> = Registry::new("decoder");
        decoder_registry.register("passthrough", |_| Ok(Box::new(PassthroughDecoder) as Box<dyn SkillDecoder>));

        let mut library = HashMap::new();
        library.insert(
            "NOOP".to_string(),
            LibraryEntry {
                decoder: "passthrough".to_string(),
                decoder_configs: None,
                src: "noop".to_string(),
                src_configs: None,
            },
        );

        Interpreter::new(skill_registry, decoder_registry, library)
    }

    fn empty_pipeline() -> EnginePipeline {
        EnginePipeline::new()
    }

    #[tokio::test]
    async fn condition_true_succeeds_false_fails() {
        let interpreter = interpreter_with_noop();
        let mut board = Blackboard::new();
        board.set("ok_flag", Value::Bool(true));
        let mut env = ExecutionContext::new();
        let mut pipeline = empty_pipeline();
        let skill_interface = SkillInterface::new();

        let tree = doc(vec![TreeNode::Leaf {
            name: CONDITION_LEAF.to_string(),
            attrs: [("@variable_name".to_string(), Value::String("ok_flag".to_string()))]
                .into_iter()
                .collect(),
        }]);

        let (status, logs) = interpreter
            .run_document(&tree, &mut board, &mut env, &mut pipeline, &skill_interface, None, None)
            .await;
        assert!(status.is_success());
        assert_eq!(logs.node_name, CONDITION_LEAF);
    }

    #[tokio::test]
    async fn fallback_returns_success_when_all_children_fail() {
        let interpreter = interpreter_with_noop();
        let mut board = Blackboard::new();
        let mut env = ExecutionContext::new();
        let mut pipeline = empty_pipeline();
        let skill_interface = SkillInterface::new();

        let tree = doc(vec![TreeNode::Fallback {
            children: vec![
                TreeNode::Leaf {
                    name: CONDITION_LEAF.to_string(),
                    attrs: [("@variable_name".to_string(), Value::String("missing".to_string()))]
                        .into_iter()
                        .collect(),
                },
                TreeNode::Leaf {
                    name: CONDITION_LEAF.to_string(),
                    attrs: [("@variable_name".to_string(), Value::String("also_missing".to_string()))]
                        .into_iter()
                        .collect(),
                },
            ],
        }]);

        let (status, _logs) = interpreter
            .run_document(&tree, &mut board, &mut env, &mut pipeline, &skill_interface, None, None)
            .await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn start_from_node_id_skips_earlier_leaves() {
        let interpreter = interpreter_with_noop();
        let mut board = Blackboard::new();
        let mut env = ExecutionContext::new();
        let mut pipeline = empty_pipeline();
        let skill_interface = SkillInterface::new();

        let tree = doc(vec![leaf("NOOP"), leaf("NOOP"), leaf("NOOP")]);

        let (status, logs) = interpreter
            .run_document(
                &tree,
                &mut board,
                &mut env,
                &mut pipeline,
                &skill_interface,
                Some(vec![2]),
                None,
            )
            .await;
        assert!(status.is_success());
        assert_eq!(logs.node_pointer, vec![2]);
    }

    #[tokio::test]
    async fn escape_at_node_id_unwinds_as_escaped() {
        let interpreter = interpreter_with_noop();
        let mut board = Blackboard::new();
        let mut env = ExecutionContext::new();
        let mut pipeline = empty_pipeline();
        let skill_interface = SkillInterface::new();

        let tree = sequence(vec![leaf("NOOP"), leaf("NOOP")]);
        let doc_with_retry = doc(vec![TreeNode::RetryUntilSuccessful {
            child: Box::new(tree),
        }]);

        let (status, _logs) = interpreter
            .run_document(
                &doc_with_retry,
                &mut board,
                &mut env,
                &mut pipeline,
                &skill_interface,
                None,
                Some(vec![0, 0]),
            )
            .await;
        assert_eq!(status.kind, StatusKind::Escaped);
    }

    #[test]
    fn untagged_tree_node_deserializes_each_shape() {
        let seq: TreeNode = serde_json::from_value(serde_json::json!({"Sequence": []})).unwrap();
        assert!(matches!(seq, TreeNode::Sequence { .. }));

        let fb: TreeNode = serde_json::from_value(serde_json::json!({"Fallback": []})).unwrap();
        assert!(matches!(fb, TreeNode::Fallback { .. }));

        let retry: TreeNode =
            serde_json::from_value(serde_json::json!({"RetryUntilSuccessful": {"Node": "X"}})).unwrap();
        assert!(matches!(retry, TreeNode::RetryUntilSuccessful { .. }));

        let leaf: TreeNode =
            serde_json::from_value(serde_json::json!({"Node": "FIND", "@target": "cup"})).unwrap();
        match leaf {
            TreeNode::Leaf { name, attrs } => {
                assert_eq!(name, "FIND");
                assert_eq!(attrs["@target"], "cup");
            }
            _ => panic!("expected leaf"),
        }
    }
}
