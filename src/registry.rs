//! Name-string → factory resolution shared by the kinematics engine,
//! controller engine, skill interface, and built-in skill library (§9
//! "Dynamic dispatch by name strings"). The source resolves skills, models,
//! adapters, and combiners from dotted path strings; here each kind of
//! extension point registers a factory under a plain name, and
//! configuration carries names rather than code. An unknown name is a
//! configuration-time [`RuntimeError::UnknownFactory`], never a runtime
//! panic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RuntimeError;

/// A generic name → factory map. `T` is typically a trait object kind, e.g.
/// `Registry<dyn ModelRobot>` is expressed as `Registry<Arc<dyn ModelRobot>>`
/// with a factory closure producing one from a `&serde_json::Value` config.
pub struct Registry<T> {
    kind: &'static str,
    factories: HashMap<String, Arc<dyn Fn(&serde_json::Value) -> Result<T, RuntimeError> + Send + Sync>>,
}

impl<T> Clone for Registry<T> {
    /// Cloning only duplicates the `Arc`-wrapped factories, never `T`
    /// itself, so this is available regardless of whether `T: Clone` —
    /// needed because the session driver hands each freshly-built
    /// [`Interpreter`](crate::interpreter::Interpreter) its own owned copy
    /// of the skill/decoder registries on every `setup`.
    fn clone(&self) -> Self {
        Registry {
            kind: self.kind,
            factories: self.factories.clone(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Registry {
            kind,
            factories: HashMap::new(),
        }
    }

    /// Registers `factory` under `name`, overwriting any previous
    /// registration for that name (re-registration is a normal part of
    /// test/binary setup, not an error).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<T, RuntimeError> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Resolves `name` against `config`, returning
    /// `RuntimeError::UnknownFactory` rather than panicking when the name
    /// isn't registered.
    pub fn resolve(&self, name: &str, config: &serde_json::Value) -> Result<T, RuntimeError> {
        let factory = self.factories.get(name).ok_or_else(|| RuntimeError::UnknownFactory {
            kind: self.kind,
            name: name.to_string(),
        })?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_factory() {
        let mut registry: Registry<i32> = Registry::new("test");
        registry.register("answer", |_| Ok(42));
        assert_eq!(registry.resolve("answer", &serde_json::Value::Null).unwrap(), 42);
    }

    #[test]
    fn unknown_name_is_configuration_time_failed_not_panic() {
        let registry: Registry<i32> = Registry::new("model_robot");
        let err = registry.resolve("nonexistent", &serde_json::Value::Null).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::UnknownFactory { kind: "model_robot", .. }
        ));
    }

    #[test]
    fn re_registration_overwrites() {
        let mut registry: Registry<i32> = Registry::new("test");
        registry.register("x", |_| Ok(1));
        registry.register("x", |_| Ok(2));
        assert_eq!(registry.resolve("x", &serde_json::Value::Null).unwrap(), 2);
    }
}
