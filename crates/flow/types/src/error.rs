//! Error taxonomy shared by the builder, evaluator and module registry

use std::fmt;

use crate::ids::NodeId;

/// Failure while evaluating an expression or coercing a value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("field {field:?} not found in {path}")]
    FieldNotFound { path: String, field: String },

    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("unknown reference {0:?}")]
    UnknownReference(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,
}

impl EvalError {
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// A structural problem that makes a configuration unloadable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate node id {id}")]
    DuplicateNode { id: NodeId },

    #[error("unknown component kind {kind:?}")]
    UnknownComponent { kind: String },

    #[error("block {kind:?} requires a label")]
    MissingLabel { kind: String },

    #[error("{node}: reference {reference:?} does not resolve to a known export")]
    UnresolvedReference { node: NodeId, reference: String },

    #[error("dependency cycle: {}", join_ids(members))]
    DependencyCycle { members: Vec<NodeId> },

    #[error("{node}: missing required argument {argument:?}")]
    MissingArgument { node: NodeId, argument: String },

    #[error("{node}: unknown argument {argument:?}")]
    UnknownArgument { node: NodeId, argument: String },

    #[error("{node}: argument {argument:?}: {detail}")]
    TypeMismatch {
        node: NodeId,
        argument: String,
        detail: String,
    },

    #[error("declaration cycle: {}", members.join(" -> "))]
    DeclarationCycle { members: Vec<String> },

    #[error("import cycle: {}", chain.join(" -> "))]
    ImportCycle { chain: Vec<String> },

    #[error("import {namespace:?}: {detail}")]
    Import { namespace: String, detail: String },

    #[error("duplicate declaration {name:?}")]
    DuplicateDeclaration { name: String },

    #[error("invalid block {block:?}: {detail}")]
    InvalidBlock { block: String, detail: String },
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Every configuration error found in one load attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ConfigErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigError> {
        self.0.iter()
    }

    /// `Ok(value)` if no error was recorded
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigError> for ConfigErrors {
    fn from(error: ConfigError) -> Self {
        Self(vec![error])
    }
}

impl FromIterator<ConfigError> for ConfigErrors {
    fn from_iter<I: IntoIterator<Item = ConfigError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ConfigErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConfigErrors {
    type Item = &'a ConfigError;
    type IntoIter = std::slice::Iter<'a, ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
