//! Run-loop supervision
//!
//! Every node's run loop is its own tokio task under a child of the flow's
//! cancellation token. A run loop that returns, fails or panics reports back
//! to the controller with an exit notice tagged by generation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use flow_types::{GlobalId, NodeId};

use crate::component::Component;
use crate::error::ComponentError;
use crate::flow::FlowEvent;

struct Task {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    tasks: HashMap<NodeId, Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the run loop of `component`.
    pub fn start(
        &mut self,
        id: NodeId,
        generation: u64,
        global: &GlobalId,
        component: Arc<dyn Component>,
        parent: &CancellationToken,
        events: mpsc::UnboundedSender<FlowEvent>,
    ) {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let node = id.clone();
        let span = tracing::info_span!("node", id = %global);

        let handle = tokio::spawn(
            async move {
                tracing::debug!("Run loop started");
                let result = match AssertUnwindSafe(component.run(token)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(ComponentError::Panicked(panic_message(panic.as_ref()))),
                };
                match &result {
                    Ok(()) => tracing::debug!("Run loop exited"),
                    Err(e) => tracing::error!(error = %e, "Run loop failed"),
                }
                let _ = events.send(FlowEvent::Exited {
                    node,
                    generation,
                    result,
                });
            }
            .instrument(span),
        );

        if let Some(previous) = self.tasks.insert(
            id,
            Task {
                generation,
                cancel,
                handle,
            },
        ) {
            previous.cancel.cancel();
        }
    }

    /// Cancel one run loop and wait for it to return.
    pub async fn stop(&mut self, id: &NodeId) {
        if let Some(task) = self.tasks.remove(id) {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    /// Cancel every run loop concurrently and wait for all of them.
    pub async fn stop_all(&mut self) {
        let tasks: Vec<Task> = self.tasks.drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        futures::future::join_all(tasks.into_iter().map(|task| task.handle)).await;
    }

    /// Forget a task whose run loop reported its exit.
    pub fn finished(&mut self, id: &NodeId, generation: u64) {
        if self
            .tasks
            .get(id)
            .is_some_and(|task| task.generation == generation)
        {
            self.tasks.remove(id);
        }
    }

    pub fn is_running(&self, id: &NodeId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
