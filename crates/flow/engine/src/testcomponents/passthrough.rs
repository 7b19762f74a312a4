//! `testcomponents.passthrough`: re-exports its input, optionally after a lag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use flow_types::{FieldSpec, Schema, TypeSpec, Value};

use crate::component::{Component, ExportSink, Options, Registration};
use crate::error::ComponentError;
use crate::update_queue::{update_queue, UpdateReceiver, UpdateSender};

pub const NAME: &str = "testcomponents.passthrough";

pub(super) fn registration() -> Registration {
    let arguments = Schema::new()
        .with_field(FieldSpec::new("input", "Value to pass through", TypeSpec::Any))
        .with_field(
            FieldSpec::new("lag", "Delay before a new input is exported", TypeSpec::Duration)
                .with_default("0s"),
        );
    let exports = Schema::new().with_field(FieldSpec::new("output", "The input value", TypeSpec::Any));

    Registration::new(NAME, arguments, exports, |opts, args| {
        Ok(Arc::new(Passthrough::new(opts, &args)?) as Arc<dyn Component>)
    })
}

fn lag(args: &Value) -> Result<Duration, ComponentError> {
    match args.get("lag") {
        None | Some(Value::Null) => Ok(Duration::ZERO),
        Some(v) => v
            .as_duration()
            .ok_or_else(|| ComponentError::invalid("lag must be a duration")),
    }
}

#[derive(Debug, Deserialize)]
struct ExportsQuery {
    field: Option<String>,
}

pub struct Passthrough {
    exports: ExportSink,
    updates_tx: UpdateSender<(Value, Duration)>,
    updates_rx: UpdateReceiver<(Value, Duration)>,
}

impl Passthrough {
    pub fn new(opts: Options, args: &Value) -> Result<Self, ComponentError> {
        lag(args)?;
        let (updates_tx, updates_rx) = update_queue(opts.config.update_queue_capacity);
        let passthrough = Self {
            exports: opts.exports,
            updates_tx,
            updates_rx,
        };
        passthrough.publish(args.get("input").cloned().unwrap_or_default());
        Ok(passthrough)
    }

    fn publish(&self, input: Value) {
        self.exports.publish(Value::object([("output", input)]));
    }
}

#[async_trait]
impl Component for Passthrough {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                (input, lag) = self.updates_rx.recv() => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(lag) => self.publish(input),
                    }
                }
            }
        }
    }

    /// `GET /exports[?field=<name>]` serves the current exports.
    fn handler(&self) -> Option<Router> {
        let exports = self.exports.clone();
        let router = Router::new().route(
            "/exports",
            get(move |Query(query): Query<ExportsQuery>| {
                let current = exports.current();
                async move {
                    Json(match query.field {
                        Some(field) => current.get(&field).cloned().unwrap_or_default(),
                        None => current,
                    })
                }
            }),
        );
        Some(router)
    }

    fn update(&self, args: Value) -> Result<(), ComponentError> {
        let lag = lag(&args)?;
        let input = args.get("input").cloned().unwrap_or_default();
        if lag.is_zero() {
            self.publish(input);
        } else {
            self.updates_tx.push((input, lag));
        }
        Ok(())
    }
}
