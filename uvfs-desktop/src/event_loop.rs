//! Event loop on top of a Tokio runtime.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, trace};
use uvfs_traits::{EventLoop, LoopHandle, LoopTask, PeriodicTask, TimerId};

type TimerTable = Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>;

/// Single driver task running posted work in FIFO order.
///
/// `future_tick` tasks go through the same queue, so they always run after
/// whatever was queued before them. Timers are Tokio tasks that post their
/// work into the queue when they fire. They are spawned on the runtime the
/// loop was started on, so timers can be armed from any thread.
pub struct TokioEventLoop {
    handle: LoopHandle,
    runtime: Handle,
    driver: Mutex<Option<JoinHandle<()>>>,
    timers: TimerTable,
    next_timer: AtomicU64,
    idle: Arc<Notify>,
}

impl TokioEventLoop {
    /// Start the loop on the current Tokio runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn() -> Arc<Self> {
        let runtime = Handle::current();
        let (handle, mut receiver) = LoopHandle::channel();
        let driver = runtime.spawn(async move {
            while let Some(task) = receiver.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("Event loop task panicked");
                }
            }
            trace!("Event loop queue closed");
        });
        debug!("Started event loop driver");

        Arc::new(Self {
            handle,
            runtime,
            driver: Mutex::new(Some(driver)),
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_timer: AtomicU64::new(1),
            idle: Arc::new(Notify::new()),
        })
    }

    /// Timers armed and not yet fired or cancelled.
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Resolve once no timer is keeping the loop alive.
    pub async fn idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active_timers() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the driver and every timer. Queued work is dropped.
    pub fn shutdown(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
        self.idle.notify_waiters();
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed))
    }

    fn forget(timers: &TimerTable, idle: &Notify, id: TimerId) {
        timers.lock().remove(&id);
        idle.notify_waiters();
    }
}

impl EventLoop for TokioEventLoop {
    fn native_handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    fn future_tick(&self, task: LoopTask) {
        if self.handle.post(task).is_err() {
            debug!("Dropped tick scheduled on a stopped loop");
        }
    }

    fn add_timer(&self, interval: Duration, task: LoopTask) -> TimerId {
        let id = self.next_id();
        let handle = self.handle.clone();
        let timers = Arc::clone(&self.timers);
        let idle = Arc::clone(&self.idle);

        // Held across spawn so the timer cannot remove itself before insertion.
        let mut table = self.timers.lock();
        let timer = self.runtime.spawn(async move {
            time::sleep(interval).await;
            Self::forget(&timers, &idle, id);
            let _ = handle.post(task);
        });
        table.insert(id, timer);
        id
    }

    fn add_periodic_timer(&self, interval: Duration, task: PeriodicTask) -> TimerId {
        let id = self.next_id();
        let handle = self.handle.clone();
        let task = Arc::new(Mutex::new(task));

        let timer = self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let task = Arc::clone(&task);
                let posted = handle.post(Box::new(move || {
                    let mut task = task.lock();
                    (&mut **task)();
                }));
                if posted.is_err() {
                    break;
                }
            }
        });
        self.timers.lock().insert(id, timer);
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        let removed = self.timers.lock().remove(&id);
        if let Some(timer) = removed {
            timer.abort();
            trace!(timer = id.0, "Cancelled timer");
            self.idle.notify_waiters();
        }
    }
}

impl Drop for TokioEventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TokioEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioEventLoop")
            .field("active_timers", &self.active_timers())
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}
