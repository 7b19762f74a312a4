//! Component registry: the set of component kinds a flow can build
//!
//! The registry is an explicit object populated before a flow is created
//! and handed to it at construction. Kinds cannot be re-registered and
//! built-in block names are reserved.

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::Registration;
use crate::error::RegistryError;

/// Block names handled by the engine itself.
pub const RESERVED_NAMES: &[&str] = &["declare", "argument", "export", "import.file", "import.string"];

/// Registry of component kinds
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    /// All registered kinds, keyed by block name
    registrations: HashMap<String, Arc<Registration>>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a component kind
    pub fn register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        let name = registration.name.clone();
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(RegistryError::Reserved(name));
        }
        if self.registrations.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        self.registrations.insert(name.clone(), Arc::new(registration));
        tracing::debug!(kind = %name, "Component kind registered");
        Ok(())
    }

    /// Get a kind by block name
    pub fn get(&self, name: &str) -> Option<Arc<Registration>> {
        self.registrations.get(name).cloned()
    }

    /// Check if a kind exists
    pub fn contains(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    /// Registered kind names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of registered kinds
    pub fn count(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::error::ComponentError;
    use async_trait::async_trait;
    use flow_types::{Schema, Value};
    use tokio_util::sync::CancellationToken;

    struct Noop;

    #[async_trait]
    impl Component for Noop {
        async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
            cancel.cancelled().await;
            Ok(())
        }

        fn update(&self, _args: Value) -> Result<(), ComponentError> {
            Ok(())
        }
    }

    fn registration(name: &str) -> Registration {
        Registration::new(name, Schema::new(), Schema::new(), |_opts, _args| {
            Ok(Arc::new(Noop) as Arc<dyn Component>)
        })
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ComponentRegistry::new();
        registry.register(registration("test.noop")).unwrap();

        let retrieved = registry.get("test.noop").unwrap();
        assert_eq!(retrieved.name, "test.noop");
        assert!(registry.contains("test.noop"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ComponentRegistry::new();
        registry.register(registration("test.noop")).unwrap();
        let result = registry.register(registration("test.noop"));
        assert_eq!(result, Err(RegistryError::Duplicate("test.noop".into())));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_reserved_names() {
        let mut registry = ComponentRegistry::new();
        for name in RESERVED_NAMES {
            assert!(matches!(
                registry.register(registration(name)),
                Err(RegistryError::Reserved(_))
            ));
        }
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ComponentRegistry::new();
        registry.register(registration("b.kind")).unwrap();
        registry.register(registration("a.kind")).unwrap();
        assert_eq!(registry.names(), vec!["a.kind", "b.kind"]);
        assert!(registry.get("c.kind").is_none());
    }
}
