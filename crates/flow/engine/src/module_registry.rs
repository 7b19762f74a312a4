//! Module registry: compiled declarations and their live instances
//!
//! Each flow scope owns a registry chained to its parent's, so a module body
//! sees the declarations of every enclosing scope. Every declaration name
//! maps to a watch slot: re-declaring replaces the value in the slot and
//! every instance subscribed to it observes the new revision.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::declaration::{qualify, Declaration};

type Slot = watch::Sender<Option<Arc<Declaration>>>;

/// Result of [`ModuleRegistry::declare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareOutcome {
    Added,
    Updated,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    parent: Option<Arc<ModuleRegistry>>,
    slots: RwLock<HashMap<String, Slot>>,
    /// qualified name -> global ids of live instances
    instances: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A registry for a nested scope; lookups fall back to `self`.
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            ..Self::default()
        })
    }

    /// Register or replace a declaration under its qualified name.
    pub fn declare(&self, declaration: Declaration) -> DeclareOutcome {
        let name = declaration.qualified_name();
        let revision = declaration.revision.clone();
        let mut slots = self.slots.write();

        let outcome = match slots.get(&name) {
            Some(slot) => {
                let unchanged = slot
                    .borrow()
                    .as_ref()
                    .is_some_and(|current| current.same_definition(&declaration));
                if unchanged {
                    DeclareOutcome::Unchanged
                } else {
                    let previous = slot.send_replace(Some(Arc::new(declaration)));
                    if previous.is_some() {
                        DeclareOutcome::Updated
                    } else {
                        DeclareOutcome::Added
                    }
                }
            }
            None => {
                let (slot, _) = watch::channel(Some(Arc::new(declaration)));
                slots.insert(name.clone(), slot);
                DeclareOutcome::Added
            }
        };

        match outcome {
            DeclareOutcome::Added => {
                tracing::info!(declaration = %name, revision = %short(&revision), "Declaration added")
            }
            DeclareOutcome::Updated => {
                tracing::info!(declaration = %name, revision = %short(&revision), "Declaration updated")
            }
            DeclareOutcome::Unchanged => {
                tracing::debug!(declaration = %name, "Declaration unchanged")
            }
        }
        outcome
    }

    /// Withdraw a declaration; subscribers observe `None`.
    pub fn remove(&self, qualified: &str) -> bool {
        let slots = self.slots.read();
        match slots.get(qualified) {
            Some(slot) if slot.borrow().is_some() => {
                slot.send_replace(None);
                tracing::info!(declaration = %qualified, "Declaration removed");
                true
            }
            _ => false,
        }
    }

    /// Look up a declaration by qualified name in this scope or any parent.
    pub fn get(&self, qualified: &str) -> Option<Arc<Declaration>> {
        let local = self
            .slots
            .read()
            .get(qualified)
            .and_then(|slot| slot.borrow().clone());
        match local {
            Some(decl) => Some(decl),
            None => self.parent.as_ref().and_then(|p| p.get(qualified)),
        }
    }

    /// Resolve a block kind used inside `namespace`.
    ///
    /// `namespace.kind` is preferred over a bare `kind`.
    pub fn resolve(&self, kind: &str, namespace: Option<&str>) -> Option<Arc<Declaration>> {
        candidates(kind, namespace)
            .into_iter()
            .find_map(|name| self.get(&name))
    }

    /// Watch the slot a kind resolves to.
    pub fn subscribe(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Option<watch::Receiver<Option<Arc<Declaration>>>> {
        candidates(kind, namespace)
            .into_iter()
            .find_map(|name| self.subscribe_exact(&name))
    }

    fn subscribe_exact(&self, qualified: &str) -> Option<watch::Receiver<Option<Arc<Declaration>>>> {
        let local = self.slots.read().get(qualified).and_then(|slot| {
            if slot.borrow().is_some() {
                Some(slot.subscribe())
            } else {
                None
            }
        });
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscribe_exact(qualified))
        })
    }

    /// Qualified names declared in this scope, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.borrow().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Track a live instance until the returned guard drops.
    pub fn register_instance(self: &Arc<Self>, qualified: &str, instance: String) -> InstanceGuard {
        self.instances
            .write()
            .entry(qualified.to_string())
            .or_default()
            .insert(instance.clone());
        InstanceGuard {
            registry: Arc::downgrade(self),
            name: qualified.to_string(),
            instance,
        }
    }

    /// Global ids of the live instances of a declaration, sorted.
    pub fn instances_of(&self, qualified: &str) -> Vec<String> {
        self.instances
            .read()
            .get(qualified)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn candidates(kind: &str, namespace: Option<&str>) -> Vec<String> {
    match namespace {
        Some(ns) if !ns.is_empty() => vec![qualify(Some(ns), kind), kind.to_string()],
        _ => vec![kind.to_string()],
    }
}

fn short(revision: &str) -> &str {
    &revision[..revision.len().min(12)]
}

/// Unregisters an instance on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    registry: Weak<ModuleRegistry>,
    name: String,
    instance: String,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut instances = registry.instances.write();
            if let Some(set) = instances.get_mut(&self.name) {
                set.remove(&self.instance);
                if set.is_empty() {
                    instances.remove(&self.name);
                }
            }
        }
    }
}
