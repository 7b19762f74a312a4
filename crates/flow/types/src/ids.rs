//! Node identities
//!
//! A [`NodeId`] is unique within one scope (the root configuration or a
//! single module instance) and is formed from the block name and label,
//! e.g. `testcomponents.count.inc`. A [`ModulePath`] names a nested scope
//! by the chain of module call-site ids that leads to it, and a
//! [`GlobalId`] combines the two.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope-local node identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for a block with the given dotted name and optional label
    pub fn from_block(name: &[String], label: Option<&str>) -> Self {
        let mut id = name.join(".");
        if let Some(label) = label {
            id.push('.');
            id.push_str(label);
        }
        Self(id)
    }

    /// Identifier formed from a reference path prefix
    pub fn from_path(path: &[String]) -> Self {
        Self(path.join("."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Path of a nested scope; empty for the root configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModulePath(pub String);

impl ModulePath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of the scope created by the module call-site `local`
    pub fn child(&self, local: &NodeId) -> Self {
        if self.is_root() {
            Self(local.0.clone())
        } else {
            Self(format!("{}/{}", self.0, local.0))
        }
    }

    /// Whether `self` is `ancestor` or lies below it
    pub fn is_within(&self, ancestor: &ModulePath) -> bool {
        ancestor.is_root()
            || self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0) && self.0[ancestor.0.len()..].starts_with('/'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node identifier qualified by the scope it lives in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    pub module: ModulePath,
    pub node: NodeId,
}

impl GlobalId {
    pub fn new(module: ModulePath, node: NodeId) -> Self {
        Self { module, node }
    }

    /// Parse `module/path/local.id`; the last segment is the local id
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once('/') {
            Some((module, node)) => Self::new(ModulePath(module.to_string()), NodeId::new(node)),
            None => Self::new(ModulePath::root(), NodeId::new(s)),
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_root() {
            write!(f, "{}", self.node)
        } else {
            write!(f, "{}/{}", self.module, self.node)
        }
    }
}
