//! The controller
//!
//! A [`Flow`] owns one scope of the running graph: the root configuration,
//! or the body of one module instance. Graph-mutating work (load, evaluation
//! rounds, teardown) runs under the scope's graph lock; component run loops
//! live outside it and talk back through the event queue.

mod node;
mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use flow_types::{
    Body, ConfigError, ConfigErrors, GlobalId, ModulePath, NodeId, Schema, Value, ValueMap,
};

use crate::builder::{Graph, GraphBuilder, NodeKind};
use crate::component::{ExportSink, Options};
use crate::component_registry::ComponentRegistry;
use crate::config::FlowConfig;
use crate::declaration::Declaration;
use crate::error::{ComponentError, FlowError, FlowResult, ImportError};
use crate::eval::{evaluate, Scope};
use crate::health::{FailureKind, Health};
use crate::import::{import_schema, ImportNode, ImportSettings, ImportTree};
use crate::module::ModuleInstance;
use crate::module_registry::ModuleRegistry;
use crate::tracker::DependencyTracker;

pub use node::{NodeInfo, NodeState};
use node::{Instance, Node};
use scheduler::Scheduler;

/// Notifications delivered to a flow's controller.
pub(crate) enum FlowEvent {
    /// A node published new exports.
    Exports(NodeId),
    /// A node's run loop returned.
    Exited {
        node: NodeId,
        generation: u64,
        result: Result<(), ComponentError>,
    },
    /// The enclosing call site supplied new module arguments.
    Arguments(Value),
}

/// What a root flow is built from.
#[derive(Clone)]
pub struct FlowOptions {
    pub components: Arc<ComponentRegistry>,
    pub config: Arc<FlowConfig>,
}

impl FlowOptions {
    pub fn new(components: ComponentRegistry) -> Self {
        Self {
            components: Arc::new(components),
            config: Arc::new(FlowConfig::default()),
        }
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

/// State shared by every scope of one running configuration.
struct Shared {
    components: Arc<ComponentRegistry>,
    config: Arc<FlowConfig>,
    /// Every live scope, keyed by module path
    scopes: DashMap<ModulePath, Weak<FlowInner>>,
}

/// Bound arguments of a module scope.
struct ModuleState {
    declaration: Arc<Declaration>,
    raw: Value,
    bound: Value,
}

struct GraphState {
    nodes: IndexMap<NodeId, Node>,
    tracker: DependencyTracker,
    scheduler: Scheduler,
    module: Option<ModuleState>,
    /// Values of `export` blocks, by label
    exports: ValueMap,
    /// Declarations registered by `declare` blocks of this body
    declarations: Vec<String>,
    /// Set while the flow is running
    cancel: Option<CancellationToken>,
}

struct FlowInner {
    path: ModulePath,
    shared: Arc<Shared>,
    modules: Arc<ModuleRegistry>,
    namespace: Option<String>,
    /// Qualified names of the declarations instantiated on the way here
    ancestry: Vec<String>,
    /// Where a module scope publishes its exports
    exports_out: Option<ExportSink>,
    graph: Mutex<GraphState>,
    events_tx: mpsc::UnboundedSender<FlowEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FlowEvent>>>,
}

impl Drop for FlowInner {
    fn drop(&mut self) {
        self.shared
            .scopes
            .remove_if(&self.path, |_, scope| scope.strong_count() == 0);
    }
}

/// Controller of one scope of the component graph.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

/// Evaluation scope over the exports of a graph's nodes.
struct GraphScope<'a> {
    nodes: &'a IndexMap<NodeId, Node>,
}

impl Scope for GraphScope<'_> {
    fn resolve(&self, path: &[String]) -> Option<(usize, &Value)> {
        (1..=path.len()).rev().find_map(|n| {
            self.nodes
                .get(&NodeId::from_path(&path[..n]))
                .filter(|node| !matches!(node.kind, NodeKind::Export))
                .map(|node| (n, &node.exports))
        })
    }
}

impl Flow {
    /// Create an empty root flow.
    pub fn new(options: FlowOptions) -> Self {
        let shared = Arc::new(Shared {
            components: options.components,
            config: options.config,
            scopes: DashMap::new(),
        });
        Self::with_scope(
            ModulePath::root(),
            shared,
            ModuleRegistry::new(),
            None,
            Vec::new(),
            None,
        )
    }

    fn with_scope(
        path: ModulePath,
        shared: Arc<Shared>,
        modules: Arc<ModuleRegistry>,
        namespace: Option<String>,
        ancestry: Vec<String>,
        exports_out: Option<ExportSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(FlowInner {
            path: path.clone(),
            shared: shared.clone(),
            modules,
            namespace,
            ancestry,
            exports_out,
            graph: Mutex::new(GraphState {
                nodes: IndexMap::new(),
                tracker: DependencyTracker::new(),
                scheduler: Scheduler::new(),
                module: None,
                exports: ValueMap::new(),
                declarations: Vec::new(),
                cancel: None,
            }),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
        });
        shared.scopes.insert(path, Arc::downgrade(&inner));
        Self { inner }
    }

    /// Scope for the body of a module instance at `call_site`.
    pub(crate) fn nested(
        &self,
        call_site: &NodeId,
        namespace: Option<String>,
        declaration: String,
        exports: ExportSink,
    ) -> Flow {
        let mut ancestry = self.inner.ancestry.clone();
        ancestry.push(declaration);
        Self::with_scope(
            self.inner.path.child(call_site),
            self.inner.shared.clone(),
            self.inner.modules.child(),
            namespace,
            ancestry,
            Some(exports),
        )
    }

    pub fn path(&self) -> &ModulePath {
        &self.inner.path
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.inner.modules
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.inner.shared.components
    }

    pub(crate) fn ancestry(&self) -> &[String] {
        &self.inner.ancestry
    }

    fn is_module(&self) -> bool {
        self.inner.exports_out.is_some()
    }

    fn global(&self, id: &NodeId) -> GlobalId {
        GlobalId::new(self.inner.path.clone(), id.clone())
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Parse and load configuration text.
    pub async fn load_source(&self, source: &str) -> FlowResult<()> {
        let body = flow_dsl::parse(source)?;
        self.load(&body).await
    }

    /// Load a configuration, replacing the current one.
    ///
    /// On error nothing changes: the previous graph keeps running.
    pub async fn load(&self, body: &Body) -> FlowResult<()> {
        let staged = self.stage_imports(body).await?;
        let mut guard = self.inner.graph.lock().await;
        let graph = self.builder(&staged).build(body).inspect_err(|errors| {
            tracing::warn!(module = %self.inner.path, errors = errors.len(), "Configuration rejected");
        })?;
        self.commit(&mut guard, graph, staged).await;
        Ok(())
    }

    /// Load a declaration body as this module scope's graph.
    ///
    /// `raw` are the call-site arguments; `None` keeps the current ones.
    pub(crate) async fn load_module(
        &self,
        declaration: Arc<Declaration>,
        raw: Option<Value>,
    ) -> FlowResult<()> {
        let staged = self.stage_imports(&declaration.body).await?;
        let mut guard = self.inner.graph.lock().await;

        let raw = raw
            .or_else(|| guard.module.as_ref().map(|m| m.raw.clone()))
            .unwrap_or_else(|| Value::Object(ValueMap::new()));
        let args = raw.as_object().cloned().unwrap_or_default();
        let bound = declaration.bind(&self.call_site(), args)?;
        let graph = self.builder(&staged).build(&declaration.body)?;

        guard.module = Some(ModuleState {
            declaration,
            raw,
            bound,
        });
        self.commit(&mut guard, graph, staged).await;
        Ok(())
    }

    /// Hand new call-site arguments to this module scope.
    pub(crate) fn set_arguments(&self, raw: Value) {
        let _ = self.inner.events_tx.send(FlowEvent::Arguments(raw));
    }

    fn call_site(&self) -> NodeId {
        let path = self.inner.path.as_str();
        NodeId::new(path.rsplit('/').next().unwrap_or(path))
    }

    fn builder<'a>(&'a self, staged: &'a HashMap<NodeId, ImportTree>) -> GraphBuilder<'a> {
        GraphBuilder::new(&self.inner.shared.components, &self.inner.modules)
            .with_namespace(self.inner.namespace.as_deref())
            .module_scope(self.is_module())
            .with_staged_imports(staged)
    }

    /// Fetch and compile every import whose arguments are constant.
    async fn stage_imports(&self, body: &Body) -> Result<HashMap<NodeId, ImportTree>, ConfigErrors> {
        let mut staged = HashMap::new();
        let mut errors = ConfigErrors::new();

        for block in &body.blocks {
            let kind = block.kind();
            let (Some(schema), Some(label)) = (import_schema(&kind), block.label.clone()) else {
                continue;
            };
            if !block.body.attributes.iter().all(|a| a.value.is_constant()) {
                continue;
            }

            let mut args = ValueMap::new();
            for attr in &block.body.attributes {
                if let Ok(v) = crate::eval::evaluate_constant(&attr.value) {
                    args.insert(attr.name.clone(), v);
                }
            }
            // The builder reports malformed arguments.
            let Ok(args) = schema.bind(args) else {
                continue;
            };
            let Ok(settings) = ImportSettings::from_args(&kind, &args, None) else {
                continue;
            };

            match ImportTree::resolve(settings.source, label.clone(), Vec::new()).await {
                Ok(tree) => {
                    staged.insert(block.id(), tree);
                }
                Err(ImportError::Config(errs)) => errors.extend(errs),
                Err(e) => errors.push(ConfigError::Import {
                    namespace: label,
                    detail: e.to_string(),
                }),
            }
        }

        errors.into_result(staged)
    }

    /// Replace the live graph with a validated one.
    async fn commit(
        &self,
        state: &mut GraphState,
        graph: Graph,
        mut staged: HashMap<NodeId, ImportTree>,
    ) {
        let Graph {
            nodes: specs,
            declarations,
            tracker,
        } = graph;

        let names: Vec<String> = declarations.iter().map(Declaration::qualified_name).collect();
        for declaration in declarations {
            self.inner.modules.declare(declaration);
        }
        for stale in state.declarations.iter().filter(|n| !names.contains(n)) {
            self.inner.modules.remove(stale);
        }
        state.declarations = names;

        let removed: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|node| {
                !specs
                    .iter()
                    .any(|spec| spec.id == node.id && node.same_kind(&spec.kind))
            })
            .map(|node| node.id.clone())
            .collect();
        for id in &removed {
            self.teardown(state, id).await;
        }

        let mut previous = std::mem::take(&mut state.nodes);
        let (mut added, mut kept) = (0, 0);
        for spec in specs {
            let node = match previous.shift_remove(&spec.id) {
                Some(mut node) => {
                    kept += 1;
                    node.kind = spec.kind;
                    node.block = spec.block;
                    node
                }
                None => {
                    added += 1;
                    Node::new(spec)
                }
            };
            state.nodes.insert(node.id.clone(), node);
        }
        state.tracker = tracker;

        let export_labels: Vec<String> = state
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Export))
            .map(|n| n.label().to_string())
            .collect();
        state.exports.retain(|label, _| export_labels.contains(label));

        tracing::info!(
            module = %self.inner.path,
            nodes = state.nodes.len(),
            added,
            kept,
            removed = removed.len(),
            "Graph loaded"
        );

        for id in state.tracker.full_order() {
            self.evaluate_node(state, &id, &mut staged).await;
        }
        self.publish_exports(state);
    }

    async fn teardown(&self, state: &mut GraphState, id: &NodeId) {
        state.scheduler.stop(id).await;
        if let Some(mut node) = state.nodes.shift_remove(id) {
            if let Some(Instance::Import(import)) = &node.instance {
                import.withdraw();
            }
            node.state = NodeState::TornDown;
            tracing::info!(module = %self.inner.path, node = %id, "Node torn down");
        }
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    /// Evaluate one node and build or update it.
    async fn evaluate_node(
        &self,
        state: &mut GraphState,
        id: &NodeId,
        staged: &mut HashMap<NodeId, ImportTree>,
    ) {
        let Some(kind) = state.nodes.get(id).map(|n| n.kind.clone()) else {
            return;
        };
        match kind {
            NodeKind::Argument => self.evaluate_argument(state, id),
            NodeKind::Export => self.evaluate_export(state, id),
            NodeKind::Component(registration) => {
                let Some(args) = self.bound_arguments(state, id, &registration.arguments) else {
                    return;
                };
                if Self::unchanged(state, id, &args) {
                    return;
                }
                let existing = state.nodes.get(id).and_then(|n| n.instance.clone());
                match existing {
                    None => {
                        let (sink, rx) = ExportSink::new(id.clone(), self.inner.events_tx.clone());
                        let options = Options {
                            id: self.global(id),
                            exports: sink,
                            config: self.inner.shared.config.clone(),
                        };
                        match registration.build(options, args.clone()) {
                            Ok(component) => {
                                self.built(state, id, Instance::Component(component), rx, args)
                            }
                            Err(e) => self.fail(state, id, FailureKind::Build, e.to_string()),
                        }
                    }
                    Some(instance) => {
                        let result = instance.component().update(args.clone());
                        self.updated(state, id, args, result);
                    }
                }
            }
            NodeKind::Module { name, declaration } => {
                let Some(raw) = self.raw_arguments(state, id) else {
                    return;
                };
                if Self::unchanged(state, id, &raw) {
                    return;
                }
                let existing = state.nodes.get(id).and_then(|n| n.instance.clone());
                match existing {
                    None => {
                        let resolved = self
                            .inner
                            .modules
                            .resolve(&name, self.inner.namespace.as_deref())
                            .or(declaration);
                        let Some(declaration) = resolved else {
                            let message = format!("declaration {name:?} is not loaded");
                            self.fail(state, id, FailureKind::Config, message);
                            return;
                        };
                        let (sink, rx) = ExportSink::new(id.clone(), self.inner.events_tx.clone());
                        match ModuleInstance::instantiate(
                            self.clone(),
                            id.clone(),
                            declaration,
                            raw.clone(),
                            sink,
                        )
                        .await
                        {
                            Ok(module) => self.built(state, id, Instance::Module(module), rx, raw),
                            Err(e) => self.fail(state, id, FailureKind::Build, e.to_string()),
                        }
                    }
                    Some(instance) => {
                        let result = instance.component().update(raw.clone());
                        self.updated(state, id, raw, result);
                    }
                }
            }
            NodeKind::Import { kind, namespace } => {
                let Some(schema) = import_schema(&kind) else {
                    return;
                };
                let Some(args) = self.bound_arguments(state, id, &schema) else {
                    return;
                };
                let fresh = staged.remove(id);
                let existing = state.nodes.get(id).and_then(|n| n.instance.clone());

                if let (Some(Instance::Import(import)), Some(tree)) = (&existing, &fresh) {
                    import.install(tree);
                }
                if Self::unchanged(state, id, &args) {
                    return;
                }

                let settings = match ImportSettings::from_args(&kind, &args, None) {
                    Ok(settings) => settings,
                    Err(e) => return self.fail(state, id, FailureKind::Evaluation, e.to_string()),
                };
                let tree = match fresh {
                    Some(tree) => tree,
                    None => {
                        match ImportTree::resolve(settings.source.clone(), namespace.clone(), Vec::new())
                            .await
                        {
                            Ok(tree) => tree,
                            Err(e) => return self.fail(state, id, FailureKind::Config, e.to_string()),
                        }
                    }
                };

                match existing {
                    None => {
                        let (sink, rx) = ExportSink::new(id.clone(), self.inner.events_tx.clone());
                        let config = &self.inner.shared.config;
                        let import = Arc::new(ImportNode::new(
                            kind,
                            namespace,
                            settings,
                            self.inner.modules.clone(),
                            sink,
                            config.import_poll_interval(),
                            config.update_queue_capacity,
                        ));
                        import.install(&tree);
                        self.built(state, id, Instance::Import(import), rx, args);
                    }
                    Some(instance) => {
                        if let Instance::Import(import) = &instance {
                            import.install(&tree);
                        }
                        let result = instance.component().update(args.clone());
                        self.updated(state, id, args, result);
                    }
                }
            }
        }
    }

    fn evaluate_argument(&self, state: &mut GraphState, id: &NodeId) {
        let bound = state.module.as_ref().map(|m| &m.bound);
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };
        let value = bound
            .and_then(|b| b.get(node.label()))
            .cloned()
            .unwrap_or_default();
        node.exports = Value::object([("value", value)]);
        if node.state == NodeState::Unbuilt {
            node.state = NodeState::Built;
            node.built_at = Some(Utc::now());
        }
    }

    fn evaluate_export(&self, state: &mut GraphState, id: &NodeId) {
        let Some(node) = state.nodes.get(id) else {
            return;
        };
        let result = match node.block.attribute("value") {
            Some(expr) => evaluate(expr, &GraphScope { nodes: &state.nodes }),
            None => Ok(Value::Null),
        };
        let label = node.label().to_string();

        match result {
            Ok(value) => {
                state.exports.insert(label, value.clone());
                if let Some(node) = state.nodes.get_mut(id) {
                    node.arguments = Some(Value::object([("value", value.clone())]));
                    node.exports = value;
                    node.health = Health::Healthy;
                    node.state = NodeState::Built;
                }
            }
            Err(e) => self.fail(state, id, FailureKind::Evaluation, e.to_string()),
        }
    }

    /// Evaluate a node's attributes into an object, without binding.
    fn raw_arguments(&self, state: &mut GraphState, id: &NodeId) -> Option<Value> {
        let node = state.nodes.get(id)?;
        let scope = GraphScope { nodes: &state.nodes };
        let evaluated: Result<ValueMap, String> = node
            .block
            .argument_exprs()
            .into_iter()
            .map(|(name, expr)| match evaluate(&expr, &scope) {
                Ok(value) => Ok((name, value)),
                Err(e) => Err(format!("{name}: {e}")),
            })
            .collect();
        match evaluated {
            Ok(args) => Some(Value::Object(args)),
            Err(message) => {
                self.fail(state, id, FailureKind::Evaluation, message);
                None
            }
        }
    }

    /// Evaluate and bind a node's attributes against `schema`.
    fn bound_arguments(&self, state: &mut GraphState, id: &NodeId, schema: &Schema) -> Option<Value> {
        let raw = self.raw_arguments(state, id)?;
        match schema.bind(raw.as_object().cloned().unwrap_or_default()) {
            Ok(bound) => Some(bound),
            Err(errors) => {
                let message = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                self.fail(state, id, FailureKind::Evaluation, message);
                None
            }
        }
    }

    /// True when `args` match what the live instance already has.
    ///
    /// A node that failed only to evaluate recovers here.
    fn unchanged(state: &mut GraphState, id: &NodeId, args: &Value) -> bool {
        let Some(node) = state.nodes.get_mut(id) else {
            return true;
        };
        if node.instance.is_none() || node.arguments.as_ref() != Some(args) {
            return false;
        }
        if !node.run_failed() && node.health.kind() == Some(FailureKind::Evaluation) {
            node.health = Health::Healthy;
            node.refresh_exports();
            tracing::info!(node = %id, "Node recovered");
        }
        true
    }

    fn built(
        &self,
        state: &mut GraphState,
        id: &NodeId,
        instance: Instance,
        rx: tokio::sync::watch::Receiver<Value>,
        args: Value,
    ) {
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };
        node.instance = Some(instance);
        node.exports_rx = Some(rx);
        node.refresh_exports();
        node.arguments = Some(args);
        node.state = NodeState::Built;
        node.health = Health::Healthy;
        node.built_at = Some(Utc::now());
        tracing::info!(module = %self.inner.path, node = %id, "Node built");

        self.start_node(state, id);
    }

    fn updated(
        &self,
        state: &mut GraphState,
        id: &NodeId,
        args: Value,
        result: Result<(), ComponentError>,
    ) {
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };
        node.arguments = Some(args);
        match result {
            Ok(()) => {
                node.update_count += 1;
                node.updated_at = Some(Utc::now());
                if !node.run_failed() {
                    node.health = Health::Healthy;
                    node.refresh_exports();
                }
                tracing::debug!(module = %self.inner.path, node = %id, "Node updated");
            }
            Err(e) => self.fail(state, id, FailureKind::Update, e.to_string()),
        }
    }

    fn fail(&self, state: &mut GraphState, id: &NodeId, kind: FailureKind, message: String) {
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };
        if node.run_failed() {
            tracing::debug!(module = %self.inner.path, node = %id, ?kind, error = %message, "Run failure kept");
            return;
        }
        tracing::warn!(module = %self.inner.path, node = %id, ?kind, error = %message, "Node unhealthy");
        node.health = Health::unhealthy(kind, message);
    }

    fn start_node(&self, state: &mut GraphState, id: &NodeId) {
        let Some(cancel) = state.cancel.clone() else {
            return;
        };
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };
        if node.state != NodeState::Built {
            return;
        }
        let Some(component) = node.instance.as_ref().map(Instance::component) else {
            return;
        };
        node.generation += 1;
        node.state = NodeState::Running;
        let generation = node.generation;

        state.scheduler.start(
            id.clone(),
            generation,
            &self.global(id),
            component,
            &cancel,
            self.inner.events_tx.clone(),
        );
    }

    fn publish_exports(&self, state: &GraphState) {
        if let Some(sink) = &self.inner.exports_out {
            sink.publish(Value::Object(state.exports.clone()));
        }
    }

    // ── Running ─────────────────────────────────────────────────────────────

    /// Run until `cancel` fires, then stop every run loop and wait for them.
    pub async fn run(&self, cancel: CancellationToken) -> FlowResult<()> {
        let mut events = self
            .inner
            .events_rx
            .lock()
            .take()
            .ok_or(FlowError::AlreadyRunning)?;

        {
            let mut guard = self.inner.graph.lock().await;
            let state = &mut *guard;
            state.cancel = Some(cancel.child_token());
            let ids: Vec<NodeId> = state.nodes.keys().cloned().collect();
            for id in &ids {
                self.start_node(state, id);
            }
            tracing::info!(module = %self.inner.path, running = state.scheduler.len(), "Flow running");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let mut batch = vec![event];
                    while let Ok(event) = events.try_recv() {
                        batch.push(event);
                    }
                    self.process(batch).await;
                }
            }
        }

        {
            let mut guard = self.inner.graph.lock().await;
            let state = &mut *guard;
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.scheduler.stop_all().await;
            for node in state.nodes.values_mut() {
                if node.state == NodeState::Running {
                    node.state = NodeState::Built;
                }
            }
        }
        *self.inner.events_rx.lock() = Some(events);
        tracing::info!(module = %self.inner.path, "Flow stopped");
        Ok(())
    }

    /// One evaluation round over a batch of events.
    pub(crate) async fn process(&self, batch: Vec<FlowEvent>) {
        let mut guard = self.inner.graph.lock().await;
        let state = &mut *guard;
        let mut changed: Vec<NodeId> = Vec::new();

        for event in batch {
            match event {
                FlowEvent::Exports(id) => {
                    let Some(node) = state.nodes.get_mut(&id) else {
                        continue;
                    };
                    if !node.health.is_healthy() {
                        tracing::debug!(node = %id, "Exports held back from unhealthy node");
                        continue;
                    }
                    if node.refresh_exports() && !changed.contains(&id) {
                        changed.push(id);
                    }
                }
                FlowEvent::Exited {
                    node: id,
                    generation,
                    result,
                } => {
                    state.scheduler.finished(&id, generation);
                    let Some(node) = state.nodes.get_mut(&id) else {
                        continue;
                    };
                    if node.generation != generation || node.state != NodeState::Running {
                        continue;
                    }
                    node.state = NodeState::Exited;
                    match result {
                        Ok(()) => tracing::info!(module = %self.inner.path, node = %id, "Run loop finished"),
                        Err(e) => {
                            tracing::error!(module = %self.inner.path, node = %id, error = %e, "Run loop failed");
                            node.health = Health::unhealthy(FailureKind::Run, e.to_string());
                        }
                    }
                }
                FlowEvent::Arguments(raw) => {
                    for id in self.rebind(state, raw) {
                        if !changed.contains(&id) {
                            changed.push(id);
                        }
                    }
                }
            }
        }

        if changed.is_empty() {
            return;
        }

        let affected = state.tracker.affected_by(&changed);
        tracing::debug!(
            module = %self.inner.path,
            changed = changed.len(),
            affected = affected.len(),
            "Evaluation round"
        );
        let mut staged = HashMap::new();
        for id in &affected {
            self.evaluate_node(state, id, &mut staged).await;
        }
        self.publish_exports(state);
    }

    /// Apply new call-site arguments; returns the argument nodes that changed.
    fn rebind(&self, state: &mut GraphState, raw: Value) -> Vec<NodeId> {
        let Some(module) = state.module.as_mut() else {
            return Vec::new();
        };
        let args = raw.as_object().cloned().unwrap_or_default();
        match module.declaration.bind(&self.call_site(), args) {
            Ok(bound) => {
                module.raw = raw;
                module.bound = bound;
            }
            Err(errors) => {
                tracing::warn!(module = %self.inner.path, error = %errors, "Module arguments rejected");
                return Vec::new();
            }
        }

        let arguments: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Argument))
            .map(|n| n.id.clone())
            .collect();
        let mut changed = Vec::new();
        for id in arguments {
            let before = state.nodes.get(&id).map(|n| n.exports.clone());
            self.evaluate_argument(state, &id);
            if state.nodes.get(&id).map(|n| &n.exports) != before.as_ref() {
                changed.push(id);
            }
        }
        changed
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    fn scope(&self, module: &str) -> FlowResult<Flow> {
        let path = ModulePath(module.to_string());
        self.inner
            .shared
            .scopes
            .get(&path)
            .and_then(|scope| scope.upgrade())
            .filter(|inner| inner.path.is_within(&self.inner.path))
            .map(|inner| Flow { inner })
            .ok_or_else(|| FlowError::ModuleNotFound(module.to_string()))
    }

    /// Every live scope at or below this one, parents first.
    fn scopes(&self) -> Vec<Flow> {
        let mut scopes: Vec<Flow> = self
            .inner
            .shared
            .scopes
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .filter(|inner| inner.path.is_within(&self.inner.path))
            .map(|inner| Flow { inner })
            .collect();
        scopes.sort_by(|a, b| a.inner.path.cmp(&b.inner.path));
        scopes
    }

    /// Debug view of one node. `module` is the module path, empty for root.
    pub async fn node_info(&self, module: &str, id: &str) -> FlowResult<NodeInfo> {
        let scope = self.scope(module)?;
        let state = scope.inner.graph.lock().await;
        let id = NodeId::new(id);
        let node = state
            .nodes
            .get(&id)
            .ok_or_else(|| FlowError::NodeNotFound(scope.global(&id).to_string()))?;
        Ok(node.info(
            scope.global(&id),
            state.tracker.dependencies(&id),
            state.tracker.dependents(&id),
        ))
    }

    /// Current exports of a node.
    pub async fn exports(&self, module: &str, id: &str) -> FlowResult<Value> {
        Ok(self.node_info(module, id).await?.exports)
    }

    /// Debug view of every node of one scope, in declaration order.
    pub async fn list_nodes(&self, module: &str) -> FlowResult<Vec<NodeInfo>> {
        let scope = self.scope(module)?;
        let state = scope.inner.graph.lock().await;
        Ok(state
            .nodes
            .values()
            .map(|node| {
                node.info(
                    scope.global(&node.id),
                    state.tracker.dependencies(&node.id),
                    state.tracker.dependents(&node.id),
                )
            })
            .collect())
    }

    /// Debug view of every node in this scope and all nested module scopes.
    pub async fn list_all(&self) -> Vec<NodeInfo> {
        let mut all = Vec::new();
        for scope in self.scopes() {
            if let Ok(nodes) = scope.list_nodes(scope.inner.path.as_str()).await {
                all.extend(nodes);
            }
        }
        all
    }

    /// HTTP handlers of every component that provides one, by global id.
    pub async fn handlers(&self) -> Vec<(GlobalId, axum::Router)> {
        let mut handlers = Vec::new();
        for scope in self.scopes() {
            let state = scope.inner.graph.lock().await;
            for node in state.nodes.values() {
                if let Some(router) = node
                    .instance
                    .as_ref()
                    .and_then(|instance| instance.component().handler())
                {
                    handlers.push((scope.global(&node.id), router));
                }
            }
        }
        handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcomponents;
    use std::time::Duration;

    fn flow() -> Flow {
        let mut components = ComponentRegistry::new();
        testcomponents::register_all(&mut components).unwrap();
        Flow::new(FlowOptions::new(components))
    }

    fn drain(flow: &Flow) -> Vec<FlowEvent> {
        let mut guard = flow.inner.events_rx.lock();
        let rx = guard.as_mut().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn sum_updates(flow: &Flow) -> u64 {
        flow.node_info("", "testcomponents.summation.b")
            .await
            .unwrap()
            .update_count
    }

    #[tokio::test]
    async fn test_batch_updates_dependent_once() {
        let flow = flow();
        flow.load_source(
            r#"
            testcomponents.summation "a" { input = 1 }
            testcomponents.summation "c" { input = 2 }
            testcomponents.summation "b" {
                input = testcomponents.summation.a.sum + testcomponents.summation.c.sum
            }
            "#,
        )
        .await
        .unwrap();
        drain(&flow);
        assert_eq!(sum_updates(&flow).await, 0);

        // Both upstreams publish before the controller gets to run.
        {
            let state = flow.inner.graph.lock().await;
            for (id, input) in [("testcomponents.summation.a", 10), ("testcomponents.summation.c", 20)] {
                let instance = state.nodes[&NodeId::new(id)].instance.clone().unwrap();
                instance
                    .component()
                    .update(Value::object([("input", Value::from(input))]))
                    .unwrap();
            }
        }

        let batch = drain(&flow);
        assert_eq!(batch.len(), 2);
        flow.process(batch).await;

        assert_eq!(sum_updates(&flow).await, 1);
        let exports = flow.exports("", "testcomponents.summation.b").await.unwrap();
        assert_eq!(exports.get("last_added"), Some(&Value::from(33)));
        assert_eq!(exports.get("sum"), Some(&Value::from(36)));
    }

    #[tokio::test]
    async fn test_reload_diffs_by_id() {
        let flow = flow();
        flow.load_source(
            r#"
            testcomponents.passthrough "keep" { input = 1 }
            testcomponents.passthrough "change" { input = 1 }
            testcomponents.passthrough "drop" { input = 1 }
            "#,
        )
        .await
        .unwrap();
        let before = flow.node_info("", "testcomponents.passthrough.keep").await.unwrap();

        flow.load_source(
            r#"
            testcomponents.passthrough "keep" { input = 1 }
            testcomponents.passthrough "change" { input = 2 }
            testcomponents.passthrough "new" { input = 3 }
            "#,
        )
        .await
        .unwrap();

        let keep = flow.node_info("", "testcomponents.passthrough.keep").await.unwrap();
        assert_eq!(keep.built_at, before.built_at);
        assert_eq!(keep.update_count, 0);

        let change = flow.node_info("", "testcomponents.passthrough.change").await.unwrap();
        assert_eq!(change.update_count, 1);

        assert!(matches!(
            flow.node_info("", "testcomponents.passthrough.drop").await,
            Err(FlowError::NodeNotFound(_))
        ));
        let ids: Vec<String> = flow
            .list_nodes("")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.local_id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "testcomponents.passthrough.keep",
                "testcomponents.passthrough.change",
                "testcomponents.passthrough.new"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let flow = flow();
        flow.load_source(r#"testcomponents.passthrough "a" { input = 1 }"#)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let flow = flow.clone();
            let cancel = cancel.clone();
            async move { flow.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            flow.run(CancellationToken::new()).await,
            Err(FlowError::AlreadyRunning)
        ));
        let info = flow.node_info("", "testcomponents.passthrough.a").await.unwrap();
        assert_eq!(info.state, NodeState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
        let info = flow.node_info("", "testcomponents.passthrough.a").await.unwrap();
        assert_eq!(info.state, NodeState::Built);
    }

    #[tokio::test]
    async fn test_unknown_scope() {
        let flow = flow();
        assert!(matches!(
            flow.list_nodes("nope").await,
            Err(FlowError::ModuleNotFound(_))
        ));
    }
}
