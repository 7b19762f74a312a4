//! Bounded per-component update queue.
//!
//! Hands new arguments from the controller (which calls
//! [`Component::update`](crate::Component::update)) to the component's run
//! loop. There is one producer and one consumer. Pushing never blocks: when
//! the queue is full the oldest pending update is dropped, since only the
//! most recent arguments matter to a run loop that fell behind.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

/// Producer half, used from `Component::update`.
pub struct UpdateSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half, used from `Component::run`.
pub struct UpdateReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a queue holding at most `capacity` pending updates (minimum 1).
pub fn update_queue<T>(capacity: usize) -> (UpdateSender<T>, UpdateReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        notify: Notify::new(),
    });
    (
        UpdateSender {
            shared: shared.clone(),
        },
        UpdateReceiver { shared },
    )
}

impl<T> UpdateSender<T> {
    /// Enqueue an update. Returns `false` if an older update was dropped.
    pub fn push(&self, item: T) -> bool {
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let dropped = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            dropped
        };
        self.shared.notify.notify_one();
        !dropped
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> UpdateReceiver<T> {
    /// Wait for the next update, in FIFO order.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(item) = self.try_recv() {
                return item;
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.shared.queue.lock().pop_front()
    }

    /// Discard everything but the newest pending update.
    pub fn latest(&self) -> Option<T> {
        let mut queue = self.shared.queue.lock();
        let last = queue.pop_back();
        queue.clear();
        last
    }
}
