//! Flow engine
//!
//! Runs a configuration as a graph of components. Each block of the
//! configuration becomes a node; an attribute that references another node's
//! exports becomes a dependency edge. When a node publishes new exports the
//! controller re-evaluates everything downstream of it, in dependency order,
//! and hands the results to the affected components as updates.
//!
//! ```text
//! configuration ──► GraphBuilder ──► Graph ──► Flow (controller)
//!                    (validate,               │
//!                     wire, sort)             ├─ evaluate / build / update nodes
//!                                             ├─ run loops (Scheduler)
//!                                             └─ nested Flows for module instances
//! ```
//!
//! Reloading replaces the graph atomically: a configuration that fails
//! validation leaves the running graph untouched, and nodes whose identity
//! and kind survive a reload keep their instance and run loop.
//!
//! Reusable pieces of configuration are `declare` blocks. They are defined
//! inline or brought in by `import.file` / `import.string`, live in the
//! [`ModuleRegistry`], and are instantiated by call sites that run the body
//! as a nested scope. Changing a declaration hot-swaps its instances.

#![deny(unsafe_code)]

pub mod builder;
pub mod component;
pub mod component_registry;
pub mod config;
pub mod declaration;
pub mod error;
pub mod eval;
pub mod flow;
pub mod health;
pub mod import;
pub mod module;
pub mod module_registry;
pub mod testcomponents;
pub mod tracker;
pub mod update_queue;

pub use builder::{Graph, GraphBuilder, NodeKind};
pub use component::{Component, ExportSink, Options, Registration};
pub use component_registry::ComponentRegistry;
pub use config::FlowConfig;
pub use declaration::Declaration;
pub use error::{ComponentError, FlowError, FlowResult, ImportError, RegistryError};
pub use flow::{Flow, FlowOptions, NodeInfo, NodeState};
pub use health::{FailureKind, Health};
pub use import::{FileSource, ImportSource, SourceContent, StringSource};
pub use module::ModuleInstance;
pub use module_registry::ModuleRegistry;
pub use tracker::DependencyTracker;
pub use update_queue::{update_queue, UpdateReceiver, UpdateSender};
