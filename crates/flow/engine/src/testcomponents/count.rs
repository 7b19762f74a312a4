//! `testcomponents.count`: counts up to `max`, one step per `frequency`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flow_types::{FieldSpec, Schema, TypeSpec, Value};

use crate::component::{Component, ExportSink, Options, Registration};
use crate::error::ComponentError;
use crate::update_queue::{update_queue, UpdateReceiver, UpdateSender};

pub const NAME: &str = "testcomponents.count";

#[derive(Debug, Clone, Copy)]
struct Settings {
    frequency: Duration,
    max: i64,
}

impl Settings {
    fn from_args(args: &Value) -> Result<Self, ComponentError> {
        let frequency = args
            .get("frequency")
            .and_then(Value::as_duration)
            .ok_or_else(|| ComponentError::invalid("frequency must be a duration"))?;
        if frequency.is_zero() {
            return Err(ComponentError::invalid("frequency must be positive"));
        }
        Ok(Self {
            frequency,
            max: super::int(args, "max")?,
        })
    }
}

pub(super) fn registration() -> Registration {
    let arguments = Schema::new()
        .with_field(FieldSpec::new("frequency", "Interval between increments", TypeSpec::Duration))
        .with_field(FieldSpec::new("max", "Value to stop at", TypeSpec::Int));
    let exports = Schema::new().with_field(FieldSpec::new("count", "Current count", TypeSpec::Int));

    Registration::new(NAME, arguments, exports, |opts, args| {
        Ok(Arc::new(Count::new(opts, &args)?) as Arc<dyn Component>)
    })
}

pub struct Count {
    exports: ExportSink,
    settings: Mutex<Settings>,
    count: AtomicI64,
    updates_tx: UpdateSender<Settings>,
    updates_rx: UpdateReceiver<Settings>,
}

impl Count {
    pub fn new(opts: Options, args: &Value) -> Result<Self, ComponentError> {
        let settings = Settings::from_args(args)?;
        let (updates_tx, updates_rx) = update_queue(opts.config.update_queue_capacity);
        opts.exports.publish(Value::object([("count", Value::from(0))]));
        Ok(Self {
            exports: opts.exports,
            settings: Mutex::new(settings),
            count: AtomicI64::new(0),
            updates_tx,
            updates_rx,
        })
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for Count {
    async fn run(&self, cancel: CancellationToken) -> Result<(), ComponentError> {
        loop {
            let settings = *self.settings.lock();
            let done = self.count() >= settings.max;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                settings = self.updates_rx.recv() => *self.settings.lock() = settings,
                _ = tokio::time::sleep(settings.frequency), if !done => {
                    let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
                    self.exports.publish(Value::object([("count", Value::from(count))]));
                }
            }
        }
    }

    fn update(&self, args: Value) -> Result<(), ComponentError> {
        self.updates_tx.push(Settings::from_args(&args)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use flow_types::{GlobalId, NodeId};

    fn options() -> (Options, tokio::sync::watch::Receiver<Value>) {
        let (exports, rx) = ExportSink::detached(NodeId::new("testcomponents.count.c"));
        let opts = Options {
            id: GlobalId::parse("testcomponents.count.c"),
            exports,
            config: Arc::new(FlowConfig::default()),
        };
        (opts, rx)
    }

    fn args(max: i64) -> Value {
        Value::object([("frequency", Value::from("1ms")), ("max", Value::from(max))])
    }

    #[tokio::test]
    async fn test_counts_to_max_then_follows_updates() {
        let (opts, mut rx) = options();
        let count = Arc::new(Count::new(opts, &args(3)).unwrap());
        assert_eq!(rx.borrow().get("count"), Some(&Value::from(0)));

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let count = count.clone();
            let cancel = cancel.clone();
            async move { count.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| v.get("count") == Some(&Value::from(3))))
            .await
            .unwrap()
            .unwrap();

        count.update(args(5)).unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| v.get("count") == Some(&Value::from(5))))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(count.count(), 5);
    }

    #[test]
    fn test_rejects_zero_frequency() {
        let (opts, _rx) = options();
        let args = Value::object([("frequency", Value::from("0s")), ("max", Value::from(1))]);
        assert!(matches!(
            Count::new(opts, &args),
            Err(ComponentError::InvalidArguments(_))
        ));
    }
}
