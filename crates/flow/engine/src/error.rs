//! Error types for the flow engine.

use flow_dsl::DslError;
use flow_types::{ConfigErrors, EvalError};
use thiserror::Error;

/// Errors returned by a component's build, update or run operations.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Arguments were well-formed but unusable by the component.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// An argument could not be evaluated or coerced.
    #[error(transparent)]
    Evaluation(#[from] EvalError),

    /// A nested configuration (module body) was rejected.
    #[error(transparent)]
    Config(#[from] ConfigErrors),

    /// Import content could not be fetched or compiled.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// The run loop panicked.
    #[error("run loop panicked: {0}")]
    Panicked(String),

    /// Component-specific failure.
    #[error("{0}")]
    Failed(String),
}

impl ComponentError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

/// Errors raised while fetching or compiling import content.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {identity}: {source}")]
    Parse {
        identity: String,
        #[source]
        source: DslError,
    },

    #[error(transparent)]
    Config(#[from] ConfigErrors),
}

/// Errors raised while registering component kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("component kind {0:?} is already registered")]
    Duplicate(String),

    #[error("{0:?} is a reserved block name")]
    Reserved(String),
}

/// Errors returned by the flow controller.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The configuration was rejected; the running graph is unchanged.
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigErrors),

    #[error(transparent)]
    Parse(#[from] DslError),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("module {0:?} not found")]
    ModuleNotFound(String),

    #[error("flow is already running")]
    AlreadyRunning,
}

/// Result type for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
