//! Per-node runtime record kept by the controller

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flow_types::{Block, GlobalId, NodeId, Value};
use serde::Serialize;
use tokio::sync::watch;

use crate::builder::{NodeKind, NodeSpec};
use crate::component::Component;
use crate::health::{FailureKind, Health};
use crate::import::ImportNode;
use crate::module::ModuleInstance;

/// Lifecycle position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not built yet, or the last build failed
    Unbuilt,
    /// Built, run loop not started
    Built,
    Running,
    /// The run loop returned on its own
    Exited,
    TornDown,
}

/// A live node instance.
#[derive(Clone)]
pub(crate) enum Instance {
    Component(Arc<dyn Component>),
    Module(Arc<ModuleInstance>),
    Import(Arc<ImportNode>),
}

impl Instance {
    pub fn component(&self) -> Arc<dyn Component> {
        match self {
            Self::Component(c) => c.clone(),
            Self::Module(m) => m.clone(),
            Self::Import(i) => i.clone(),
        }
    }
}

pub(crate) struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub block: Block,
    /// Last arguments handed to build or update
    pub arguments: Option<Value>,
    /// Exports as seen by dependents; frozen while unhealthy
    pub exports: Value,
    pub instance: Option<Instance>,
    pub exports_rx: Option<watch::Receiver<Value>>,
    pub state: NodeState,
    pub health: Health,
    pub built_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub update_count: u64,
    /// Bumped on every start; stale exit notices are ignored
    pub generation: u64,
}

impl Node {
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            id: spec.id,
            kind: spec.kind,
            block: spec.block,
            arguments: None,
            exports: Value::Null,
            instance: None,
            exports_rx: None,
            state: NodeState::Unbuilt,
            health: Health::Healthy,
            built_at: None,
            updated_at: None,
            update_count: 0,
            generation: 0,
        }
    }

    /// Whether a node built for `other` can stand in for it.
    pub fn same_kind(&self, other: &NodeKind) -> bool {
        match (&self.kind, other) {
            (NodeKind::Component(a), NodeKind::Component(b)) => a.name == b.name,
            (NodeKind::Module { name: a, .. }, NodeKind::Module { name: b, .. }) => a == b,
            (NodeKind::Import { kind: a, .. }, NodeKind::Import { kind: b, .. }) => a == b,
            (NodeKind::Argument, NodeKind::Argument) | (NodeKind::Export, NodeKind::Export) => true,
            _ => false,
        }
    }

    /// The run loop failed. Nothing short of a rebuild clears this.
    pub fn run_failed(&self) -> bool {
        self.state == NodeState::Exited && self.health.kind() == Some(FailureKind::Run)
    }

    /// Adopt the latest published exports.
    ///
    /// Returns whether they differ from what dependents saw so far.
    pub fn refresh_exports(&mut self) -> bool {
        let Some(rx) = self.exports_rx.as_mut() else {
            return false;
        };
        let latest = rx.borrow_and_update().clone();
        if latest == self.exports {
            false
        } else {
            self.exports = latest;
            true
        }
    }

    pub fn label(&self) -> &str {
        self.block.label.as_deref().unwrap_or_default()
    }

    pub fn info(&self, global: GlobalId, dependencies: Vec<NodeId>, dependents: Vec<NodeId>) -> NodeInfo {
        let reported = self.instance.as_ref().and_then(|i| i.component().health());
        NodeInfo {
            id: global.to_string(),
            module: global.module.to_string(),
            local_id: self.id.to_string(),
            kind: self.block.kind(),
            node_type: self.kind.name(),
            state: self.state,
            health: self.health.clone().merge(reported),
            arguments: self.arguments.clone().unwrap_or_default(),
            exports: self.exports.clone(),
            built_at: self.built_at,
            updated_at: self.updated_at,
            update_count: self.update_count,
            dependencies: dependencies.into_iter().map(|id| id.0).collect(),
            dependents: dependents.into_iter().map(|id| id.0).collect(),
        }
    }
}

/// Debug view of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    /// Global id, `module/path/local.id`
    pub id: String,
    pub module: String,
    pub local_id: String,
    /// Block kind, e.g. `testcomponents.count`
    pub kind: String,
    /// `component`, `module`, `import`, `argument` or `export`
    pub node_type: &'static str,
    pub state: NodeState,
    pub health: Health,
    pub arguments: Value,
    pub exports: Value,
    pub built_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub update_count: u64,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}
