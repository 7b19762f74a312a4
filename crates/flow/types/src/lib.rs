//! Flow domain types
//!
//! Shared vocabulary for the flow component graph runtime:
//!
//! - **Value**: the dynamically-typed tree that flows between components
//!   as arguments and exports
//! - **Schema**: typed field descriptions checked when arguments are bound
//! - **Ast**: the parsed configuration tree of blocks, attributes and
//!   expressions
//! - **Ids**: node identities, local to a scope or qualified by module path
//! - **Errors**: configuration and evaluation error taxonomy

#![deny(unsafe_code)]

pub mod ast;
pub mod duration;
pub mod error;
pub mod ids;
pub mod schema;
pub mod value;

pub use ast::{Attribute, BinaryOp, Block, Body, Expr, Span, UnaryOp};
pub use duration::{parse_duration, InvalidDuration};
pub use error::{ConfigError, ConfigErrors, EvalError};
pub use ids::{GlobalId, ModulePath, NodeId};
pub use schema::{BindError, FieldSpec, Schema, TypeSpec};
pub use value::{Capsule, Number, Value, ValueMap, ValueType};
