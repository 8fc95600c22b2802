//! Periodic task scheduler.
//!
//! One scheduler drives one task on a wall-clock interval. The task body
//! runs inline in the scheduler loop, so invocations are serialized; ticks
//! that elapse while a run is still in flight are skipped, never queued.
//! A backlog of runs would only amplify upstream load without adding
//! freshness, since each run overwrites the same cached artifact.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

type TaskFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct Scheduler {
    name: String,
    interval: Duration,
    task: TaskFn,
    running: Mutex<Option<Running>>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            task: Arc::new(move || Box::pin(task())),
            running: Mutex::new(None),
        }
    }

    /// Starts the periodic loop. With `immediate` the task runs once before
    /// the first interval elapses. Calling `start` on a running scheduler is
    /// a no-op.
    pub fn start(&self, immediate: bool) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = self.task.clone();
        let name = self.name.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            if !immediate {
                // Consume the tick that fires at startup.
                ticker.tick().await;
            }
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                task().await;
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            debug!("scheduler {:?} stopped", name);
        });

        *running = Some(Running { shutdown, handle });
    }

    /// Cancels the loop and waits for an in-flight task run to finish.
    /// Idempotent.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}
