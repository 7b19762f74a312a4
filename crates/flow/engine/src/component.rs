//! The component contract.
//!
//! Every node kind implements [`Component`]. The controller builds an
//! instance from a [`Registration`] with the node's first evaluated
//! arguments, starts its run loop once, and calls `update` whenever the
//! arguments change. Components publish exports through the
//! [`ExportSink`] handed to them in [`Options`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use flow_types::{GlobalId, NodeId, Schema, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::FlowConfig;
use crate::error::ComponentError;
use crate::flow::FlowEvent;
use crate::health::Health;

/// A live node instance.
#[async_trait]
pub trait Component: Send + Sync {
    /// Long-lived work. Returns when `cancel` fires or on fatal failure.
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError>;

    /// Apply new arguments. May be called while `run` is executing.
    fn update(&self, args: Value) -> Result<(), ComponentError>;

    /// HTTP surface mounted under the node's id.
    fn handler(&self) -> Option<axum::Router> {
        None
    }

    /// Health as reported by the component itself.
    fn health(&self) -> Option<Health> {
        None
    }
}

/// Everything a component gets at build time besides its arguments.
#[derive(Clone)]
pub struct Options {
    /// Identity of the node being built.
    pub id: GlobalId,
    /// Where to publish exports.
    pub exports: ExportSink,
    /// Engine tunables.
    pub config: Arc<FlowConfig>,
}

type BuildFn = dyn Fn(Options, Value) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync;

/// A component kind: its name, schemas and constructor.
#[derive(Clone)]
pub struct Registration {
    /// Block name, e.g. `testcomponents.count`.
    pub name: String,
    /// Schema the node's attributes are bound against.
    pub arguments: Schema,
    /// Schema of the published exports.
    pub exports: Schema,
    build: Arc<BuildFn>,
}

impl Registration {
    pub fn new<F>(name: impl Into<String>, arguments: Schema, exports: Schema, build: F) -> Self
    where
        F: Fn(Options, Value) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arguments,
            exports,
            build: Arc::new(build),
        }
    }

    /// Construct an instance from bound arguments.
    pub fn build(&self, opts: Options, args: Value) -> Result<Arc<dyn Component>, ComponentError> {
        (self.build)(opts, args)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// Publishes a node's exports and wakes the owning controller.
///
/// The latest value is kept in a watch channel so the controller always
/// reads the newest export; several publishes before the controller runs
/// collapse into one evaluation round.
#[derive(Clone)]
pub struct ExportSink {
    node: NodeId,
    value: Arc<watch::Sender<Value>>,
    events: Option<mpsc::UnboundedSender<FlowEvent>>,
}

impl ExportSink {
    pub(crate) fn new(
        node: NodeId,
        events: mpsc::UnboundedSender<FlowEvent>,
    ) -> (Self, watch::Receiver<Value>) {
        let (tx, rx) = watch::channel(Value::Null);
        let sink = Self {
            node,
            value: Arc::new(tx),
            events: Some(events),
        };
        (sink, rx)
    }

    /// A sink not attached to any controller.
    pub fn detached(node: NodeId) -> (Self, watch::Receiver<Value>) {
        let (tx, rx) = watch::channel(Value::Null);
        let sink = Self {
            node,
            value: Arc::new(tx),
            events: None,
        };
        (sink, rx)
    }

    /// Replace the exports; the controller is notified only on change.
    pub fn publish(&self, exports: Value) {
        let changed = self.value.send_if_modified(|current| {
            if *current == exports {
                false
            } else {
                *current = exports;
                true
            }
        });
        if changed {
            if let Some(events) = &self.events {
                let _ = events.send(FlowEvent::Exports(self.node.clone()));
            }
        }
    }

    /// The most recently published exports.
    pub fn current(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_notifies_only_on_change() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (sink, rx) = ExportSink::new(NodeId::new("a.b"), events_tx);

        sink.publish(Value::object([("n", Value::from(1))]));
        sink.publish(Value::object([("n", Value::from(1))]));
        sink.publish(Value::object([("n", Value::from(2))]));

        assert!(matches!(events_rx.try_recv(), Ok(FlowEvent::Exports(id)) if id.as_str() == "a.b"));
        assert!(matches!(events_rx.try_recv(), Ok(FlowEvent::Exports(_))));
        assert!(events_rx.try_recv().is_err());
        assert_eq!(rx.borrow().get("n"), Some(&Value::from(2)));
        assert_eq!(sink.current().get("n"), Some(&Value::from(2)));
    }

    #[test]
    fn test_detached_sink_keeps_latest() {
        let (sink, rx) = ExportSink::detached(NodeId::new("x"));
        sink.publish(Value::from("hello"));
        assert_eq!(*rx.borrow(), Value::from("hello"));
    }
}
