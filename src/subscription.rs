//! Broadcast fan-out with coalescing mailboxes.
//!
//! Every subscriber owns a one-slot mailbox. `emit` performs a non-blocking
//! send to each live subscriber, so duplicate signals during a burst collapse
//! into a single delivery; an idle consumer still observes at least one
//! signal per burst.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

type Subscribers = Mutex<HashMap<u64, mpsc::Sender<()>>>;

#[derive(Default)]
pub struct SubscriptionManager {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Signals every live subscriber without blocking. A subscriber whose
    /// mailbox already holds a pending signal is skipped.
    pub fn emit(&self) {
        let subscribers = self.subscribers.lock();
        for tx in subscribers.values() {
            let _ = tx.try_send(());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drops every subscriber, closing all mailboxes. Consumers observe the
    /// close and terminate.
    pub fn shutdown(&self) {
        let mut subscribers = self.subscribers.lock();
        let n = subscribers.len();
        subscribers.clear();
        if n > 0 {
            debug!("subscription manager shut down, dropped {} subscribers", n);
        }
    }
}

pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<()>,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Waits for the next signal. Returns `None` once the subscription has
    /// been cancelled or the manager shut down.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Removes the subscriber from the manager and closes the mailbox.
    /// Idempotent; pending signals are discarded.
    pub fn cancel(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().remove(&self.id);
        }
        self.rx.close();
    }

    /// Spawns a consumer that runs `callback` on every delivered signal,
    /// optionally once up front. The consumer ends when the subscription is
    /// cancelled or the manager shuts down.
    pub fn watch<F, Fut>(mut self, callback: F, call_now: bool) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            if call_now {
                callback().await;
            }
            while self.recv().await.is_some() {
                callback().await;
            }
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
