//! `testcomponents.fail`: fails on demand.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flow_types::{FieldSpec, Schema, TypeSpec, Value};

use crate::component::{Component, ExportSink, Options, Registration};
use crate::error::ComponentError;

pub const NAME: &str = "testcomponents.fail";

pub(super) fn registration() -> Registration {
    let arguments = Schema::new()
        .with_field(
            FieldSpec::new("fail_update", "Reject every update", TypeSpec::Bool).with_default(false),
        )
        .with_field(
            FieldSpec::new("fail_run", "Return an error from the run loop", TypeSpec::Bool)
                .with_default(false),
        )
        .with_field(
            FieldSpec::new("panic_run", "Panic in the run loop", TypeSpec::Bool).with_default(false),
        )
        .with_field(FieldSpec::new("run_error", "Error message of a failing run", TypeSpec::String).optional())
        .with_field(FieldSpec::new("value", "Value to export", TypeSpec::Any).optional());
    let exports = Schema::new().with_field(FieldSpec::new("value", "The value argument", TypeSpec::Any));

    Registration::new(NAME, arguments, exports, |opts, args| {
        Ok(Arc::new(Fail::new(opts, args)) as Arc<dyn Component>)
    })
}

pub struct Fail {
    exports: ExportSink,
    args: Mutex<Value>,
}

impl Fail {
    pub fn new(opts: Options, args: Value) -> Self {
        let fail = Self {
            exports: opts.exports,
            args: Mutex::new(Value::Null),
        };
        fail.apply(args);
        fail
    }

    fn apply(&self, args: Value) {
        let value = args.get("value").cloned().unwrap_or_default();
        *self.args.lock() = args;
        self.exports.publish(Value::object([("value", value)]));
    }
}

#[async_trait]
impl Component for Fail {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        let args = self.args.lock().clone();
        if super::flag(&args, "panic_run") {
            panic!("{}", args.get("run_error").and_then(Value::as_str).unwrap_or("panic requested"));
        }
        if super::flag(&args, "fail_run") {
            let message = args.get("run_error").and_then(Value::as_str).unwrap_or("run failed");
            return Err(ComponentError::failed(message));
        }
        cancel.cancelled().await;
        Ok(())
    }

    fn update(&self, args: Value) -> Result<(), ComponentError> {
        if super::flag(&self.args.lock(), "fail_update") {
            return Err(ComponentError::failed("update rejected"));
        }
        self.apply(args);
        Ok(())
    }
}
