//! Component kinds used to exercise the engine
//!
//! They have no side effects outside the graph, which makes them suitable for
//! tests and for trying configurations out with the agent.

mod count;
mod fail;
mod passthrough;
mod summation;

use flow_types::Value;

use crate::component_registry::ComponentRegistry;
use crate::error::{ComponentError, RegistryError};

pub use count::Count;
pub use fail::Fail;
pub use passthrough::Passthrough;
pub use summation::Summation;

/// Register every test component kind.
pub fn register_all(registry: &mut ComponentRegistry) -> Result<(), RegistryError> {
    registry.register(count::registration())?;
    registry.register(passthrough::registration())?;
    registry.register(summation::registration())?;
    registry.register(fail::registration())?;
    Ok(())
}

fn int(args: &Value, name: &str) -> Result<i64, ComponentError> {
    args.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| ComponentError::invalid(format!("{name} must be an integer")))
}

fn flag(args: &Value, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}
