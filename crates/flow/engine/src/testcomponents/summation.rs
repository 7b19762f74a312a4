//! `testcomponents.summation`: keeps a running total of every input it sees.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flow_types::{FieldSpec, Schema, TypeSpec, Value};

use crate::component::{Component, ExportSink, Options, Registration};
use crate::error::ComponentError;

pub const NAME: &str = "testcomponents.summation";

pub(super) fn registration() -> Registration {
    let arguments = Schema::new().with_field(FieldSpec::new("input", "Value to add", TypeSpec::Int));
    let exports = Schema::new()
        .with_field(FieldSpec::new("sum", "Total of all inputs", TypeSpec::Int))
        .with_field(FieldSpec::new("last_added", "Most recent input", TypeSpec::Int));

    Registration::new(NAME, arguments, exports, |opts, args| {
        Ok(Arc::new(Summation::new(opts, &args)?) as Arc<dyn Component>)
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    sum: i64,
    last_added: i64,
}

pub struct Summation {
    exports: ExportSink,
    totals: Mutex<Totals>,
}

impl Summation {
    pub fn new(opts: Options, args: &Value) -> Result<Self, ComponentError> {
        let summation = Self {
            exports: opts.exports,
            totals: Mutex::new(Totals::default()),
        };
        summation.add(super::int(args, "input")?);
        Ok(summation)
    }

    fn add(&self, input: i64) {
        let totals = {
            let mut totals = self.totals.lock();
            totals.sum += input;
            totals.last_added = input;
            *totals
        };
        tracing::debug!(input, sum = totals.sum, "Input added");
        self.exports.publish(Value::object([
            ("sum", Value::from(totals.sum)),
            ("last_added", Value::from(totals.last_added)),
        ]));
    }
}

#[async_trait]
impl Component for Summation {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        cancel.cancelled().await;
        Ok(())
    }

    fn update(&self, args: Value) -> Result<(), ComponentError> {
        self.add(super::int(&args, "input")?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use flow_types::{GlobalId, NodeId};

    #[test]
    fn test_running_total() {
        let (exports, rx) = ExportSink::detached(NodeId::new("testcomponents.summation.s"));
        let opts = Options {
            id: GlobalId::parse("testcomponents.summation.s"),
            exports,
            config: Arc::new(FlowConfig::default()),
        };
        let s = Summation::new(opts, &Value::object([("input", Value::from(1))])).unwrap();
        for input in [2, 3, -4] {
            s.update(Value::object([("input", Value::from(input))])).unwrap();
        }

        let exports = rx.borrow().clone();
        assert_eq!(exports.get("sum"), Some(&Value::from(2)));
        assert_eq!(exports.get("last_added"), Some(&Value::from(-4)));
        assert!(s.update(Value::object([("input", Value::from("x"))])).is_err());
    }
}
