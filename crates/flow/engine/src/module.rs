//! Module instances
//!
//! A module call site (`my_decl "label" { ... }`) runs the declaration's body
//! as a nested [`Flow`]. The instance follows its declaration in the module
//! registry: when the declaration is replaced the nested graph is hot-swapped
//! in place, and the call site itself is neither rebuilt nor restarted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use flow_types::{ConfigError, ConfigErrors, GlobalId, NodeId, Value};

use crate::component::{Component, ExportSink};
use crate::declaration::Declaration;
use crate::error::{ComponentError, FlowError};
use crate::flow::Flow;
use crate::health::{FailureKind, Health};
use crate::module_registry::InstanceGuard;

type DeclarationWatch = watch::Receiver<Option<Arc<Declaration>>>;

/// A running instance of a declaration.
pub struct ModuleInstance {
    id: GlobalId,
    name: String,
    flow: Flow,
    declaration: Mutex<Arc<Declaration>>,
    updates: Mutex<Option<DeclarationWatch>>,
    reload_error: Mutex<Option<String>>,
    _guard: InstanceGuard,
}

impl ModuleInstance {
    /// Build the nested scope for call site `id` of `parent` and load the
    /// declaration body into it.
    pub(crate) fn instantiate(
        parent: Flow,
        id: NodeId,
        declaration: Arc<Declaration>,
        raw: Value,
        exports: ExportSink,
    ) -> BoxFuture<'static, Result<Arc<Self>, ComponentError>> {
        async move {
            let name = declaration.qualified_name();
            if parent.ancestry().contains(&name) {
                let mut members = parent.ancestry().to_vec();
                members.push(name);
                return Err(ConfigErrors::from(ConfigError::DeclarationCycle { members }).into());
            }

            let updates = parent.modules().subscribe(&name, None);
            let flow = parent.nested(&id, declaration.namespace.clone(), name.clone(), exports);
            flow.load_module(declaration.clone(), Some(raw))
                .await
                .map_err(|e| match e {
                    FlowError::Config(errors) => ComponentError::Config(errors),
                    other => ComponentError::failed(other.to_string()),
                })?;

            let global = GlobalId::new(parent.path().clone(), id);
            let guard = parent.modules().register_instance(&name, global.to_string());
            tracing::info!(
                module = %global,
                declaration = %name,
                revision = %declaration.revision,
                "Module instantiated"
            );

            Ok(Arc::new(Self {
                id: global,
                name,
                flow,
                declaration: Mutex::new(declaration),
                updates: Mutex::new(updates),
                reload_error: Mutex::new(None),
                _guard: guard,
            }))
        }
        .boxed()
    }

    pub fn id(&self) -> &GlobalId {
        &self.id
    }

    /// The declaration currently loaded.
    pub fn declaration(&self) -> Arc<Declaration> {
        self.declaration.lock().clone()
    }

    /// The nested scope.
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Follow the declaration's registry slot until cancelled.
    async fn follow(&self, updates: Option<DeclarationWatch>, cancel: CancellationToken) -> Option<DeclarationWatch> {
        let Some(mut rx) = updates else {
            cancel.cancelled().await;
            return None;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        cancel.cancelled().await;
                        break;
                    }
                    let next = rx.borrow_and_update().clone();
                    self.reload(next).await;
                }
            }
        }
        Some(rx)
    }

    async fn reload(&self, next: Option<Arc<Declaration>>) {
        let Some(next) = next else {
            tracing::warn!(module = %self.id, declaration = %self.name, "Declaration removed");
            *self.reload_error.lock() = Some(format!("declaration {:?} is no longer loaded", self.name));
            return;
        };

        let current = self.declaration();
        if current.same_definition(&next) {
            *self.declaration.lock() = next;
            *self.reload_error.lock() = None;
            return;
        }

        match self.flow.load_module(next.clone(), None).await {
            Ok(()) => {
                tracing::info!(
                    module = %self.id,
                    declaration = %self.name,
                    revision = %next.revision,
                    "Module reloaded"
                );
                *self.declaration.lock() = next;
                *self.reload_error.lock() = None;
            }
            Err(e) => {
                tracing::warn!(module = %self.id, declaration = %self.name, error = %e, "Module reload rejected");
                *self.reload_error.lock() = Some(e.to_string());
            }
        }
    }
}

#[async_trait]
impl Component for ModuleInstance {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        let updates = self.updates.lock().take();
        let (result, updates) = tokio::join!(
            self.flow.run(cancel.clone()),
            self.follow(updates, cancel.clone())
        );
        *self.updates.lock() = updates;
        result.map_err(|e| ComponentError::failed(e.to_string()))
    }

    fn update(&self, raw: Value) -> Result<(), ComponentError> {
        let declaration = self.declaration();
        declaration.bind(&self.id.node, raw.as_object().cloned().unwrap_or_default())?;
        self.flow.set_arguments(raw);
        Ok(())
    }

    fn health(&self) -> Option<Health> {
        self.reload_error
            .lock()
            .as_ref()
            .map(|e| Health::unhealthy(FailureKind::Config, e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_registry::ComponentRegistry;
    use crate::flow::FlowOptions;
    use crate::testcomponents;
    use std::time::Duration;

    const BODY: &str = r#"
        declare "add" {
            argument "a" { }
            argument "b" {
                optional = true
                default  = 1
            }
            export "sum" { value = argument.a.value + argument.b.value }
        }
    "#;

    fn flow() -> Flow {
        let mut components = ComponentRegistry::new();
        testcomponents::register_all(&mut components).unwrap();
        Flow::new(FlowOptions::new(components))
    }

    async fn sum(flow: &Flow) -> Option<Value> {
        flow.exports("", "add.x").await.unwrap().get("sum").cloned()
    }

    async fn wait_for_sum(flow: &Flow, expected: i64) {
        for _ in 0..200 {
            if sum(flow).await == Some(Value::from(expected)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sum never reached {expected}, last {:?}", sum(flow).await);
    }

    #[tokio::test]
    async fn test_exports_available_after_load() {
        let flow = flow();
        flow.load_source(&format!("{BODY}\nadd \"x\" {{ a = 41 }}"))
            .await
            .unwrap();

        assert_eq!(sum(&flow).await, Some(Value::from(42)));

        let info = flow.node_info("", "add.x").await.unwrap();
        assert_eq!(info.node_type, "module");
        assert!(info.health.is_healthy());

        let inner = flow.list_nodes("add.x").await.unwrap();
        let ids: Vec<&str> = inner.iter().map(|n| n.local_id.as_str()).collect();
        assert_eq!(ids, vec!["argument.a", "argument.b", "export.sum"]);
        assert_eq!(flow.modules().instances_of("add"), vec!["add.x".to_string()]);
    }

    #[tokio::test]
    async fn test_arguments_and_hot_swap() {
        let flow = flow();
        flow.load_source(&format!("{BODY}\nadd \"x\" {{ a = 41 }}"))
            .await
            .unwrap();
        let built_at = flow.node_info("", "add.x").await.unwrap().built_at;

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let flow = flow.clone();
            let cancel = cancel.clone();
            async move { flow.run(cancel).await }
        });

        flow.load_source(&format!("{BODY}\nadd \"x\" {{ a = 1 }}"))
            .await
            .unwrap();
        wait_for_sum(&flow, 2).await;

        let swapped = BODY.replace("argument.a.value + argument.b.value", "argument.a.value * 10");
        flow.load_source(&format!("{swapped}\nadd \"x\" {{ a = 1 }}"))
            .await
            .unwrap();
        wait_for_sum(&flow, 10).await;

        let info = flow.node_info("", "add.x").await.unwrap();
        assert_eq!(info.built_at, built_at);
        assert!(info.health.is_healthy());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_recursive_instantiation_is_rejected() {
        // Neither unit sees the loop on its own: `outer` uses `lib.a`, which
        // uses `outer` again.
        let flow = flow();
        flow.load_source(
            r#"
            import.string "lib" {
                content = `declare "a" { outer "y" { } }`
            }
            declare "outer" {
                lib.a "z" { }
            }
            outer "o" { }
            "#,
        )
        .await
        .unwrap();

        let outer = flow.node_info("", "outer.o").await.unwrap();
        assert!(outer.health.is_healthy());
        let inner = flow.node_info("outer.o", "lib.a.z").await.unwrap();
        assert!(inner.health.is_healthy());

        let again = flow.node_info("outer.o/lib.a.z", "outer.y").await.unwrap();
        assert_eq!(again.health.kind(), Some(FailureKind::Build));
        assert_eq!(again.state, crate::flow::NodeState::Unbuilt);
        let message = again.health.message().unwrap_or_default();
        assert!(message.contains("declaration cycle: outer -> lib.a -> outer"), "{message}");
    }

    #[tokio::test]
    async fn test_bad_call_site_arguments() {
        let flow = flow();
        let err = flow
            .load_source(&format!("{BODY}\nadd \"x\" {{ c = 1 }}"))
            .await
            .unwrap_err();
        let FlowError::Config(errors) = err else {
            panic!("expected config errors");
        };
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownArgument { argument, .. } if argument == "c")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingArgument { argument, .. } if argument == "a")));
    }
}
