//! The process-scoped variable store skill leaves write to and `CONDITION`
//! nodes read from. Grounded on the dependency crate's `MemoryStore` trait
//! (string-keyed `retrieve`/`write`), minus the pluggable-backend
//! abstraction: §5 states the blackboard is owned directly by the session
//! driver rather than swapped out, so this is a plain struct, not a trait.

use std::collections::HashMap;

use serde_json::Value;

/// Conventional keys written by built-in skills (§3).
pub mod keys {
    pub const FIND_TRUE: &str = "find_true";
    pub const FIND_RESULT: &str = "find_result";
    pub const PERCEPTION_TRUE: &str = "perception_true";
}

#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    values: HashMap<String, Value>,
}

impl Blackboard {
    pub fn new() -> Self {
        Blackboard::default()
    }

    /// Sets `name` to `value`. A no-op (logged at `debug`) for an empty
    /// key, per §4.H.
    pub fn set(&mut self, name: impl AsRef<str>, value: Value) {
        let name = name.as_ref();
        if name.is_empty() {
            log::debug!("blackboard: ignoring set with empty key");
            return;
        }
        self.values.insert(name.to_string(), value);
    }

    /// Never fails: an unknown key returns `Value::Null`, giving
    /// `CONDITION` nodes a truthiness check with no special-casing.
    pub fn get(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Truthiness used by `CONDITION` leaves: present, non-null, and not
    /// `false`/`0`/empty-string.
    pub fn is_truthy(&self, name: &str) -> bool {
        match self.get(name) {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Resolves a `{blackboard_key}`-style reference, returning `None` for
    /// plain literals (used by skills like `look`/`grasp` that accept
    /// either a literal value or a blackboard reference for a parameter).
    pub fn resolve_reference(&self, raw: &str) -> Option<Value> {
        let key = raw.strip_prefix('{')?.strip_suffix('}')?;
        Some(self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_unknown_key_is_null_not_panic() {
        let board = Blackboard::new();
        assert_eq!(board.get("nope"), Value::Null);
    }

    #[test]
    fn set_with_empty_key_is_ignored() {
        let mut board = Blackboard::new();
        board.set("", Value::Bool(true));
        assert_eq!(board.get(""), Value::Null);
    }

    #[test]
    fn resolve_reference_only_matches_brace_syntax() {
        let mut board = Blackboard::new();
        board.set("find_true", Value::Bool(true));
        assert_eq!(
            board.resolve_reference("{find_true}"),
            Some(Value::Bool(true))
        );
        assert_eq!(board.resolve_reference("find_true"), None);
    }

    #[test]
    fn truthiness_matches_condition_node_expectations() {
        let mut board = Blackboard::new();
        board.set("ok", Value::Bool(true));
        board.set("bad", Value::Bool(false));
        assert!(board.is_truthy("ok"));
        assert!(!board.is_truthy("bad"));
        assert!(!board.is_truthy("missing"));
    }
}
