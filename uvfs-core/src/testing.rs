//! Deterministic collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uvfs_traits::{
    Clock, EventLoop, LoopHandle, LoopTask, NativeBackend, NativeCallback, NativeError,
    NativeReply, NativeRequest, PeriodicTask, TimerId,
};

/// Event loop that only runs when told to.
pub(crate) struct ManualLoop {
    handle: LoopHandle,
    posted: Mutex<mpsc::UnboundedReceiver<LoopTask>>,
    ticks: Mutex<VecDeque<LoopTask>>,
    timers: Mutex<HashMap<TimerId, Duration>>,
    next_timer: AtomicU64,
    fail_next_timer: AtomicBool,
}

impl ManualLoop {
    pub(crate) fn new() -> Arc<Self> {
        let (handle, receiver) = LoopHandle::channel();
        Arc::new(Self {
            handle,
            posted: Mutex::new(receiver),
            ticks: Mutex::new(VecDeque::new()),
            timers: Mutex::new(HashMap::new()),
            next_timer: AtomicU64::new(1),
            fail_next_timer: AtomicBool::new(false),
        })
    }

    /// Run completions posted through the loop handle.
    pub(crate) fn run_posted(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.posted.lock().try_recv().ok();
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        ran
    }

    /// Run the ticks queued so far. Ticks queued while running wait.
    pub(crate) fn run_ticks(&self) -> usize {
        let ticks: Vec<LoopTask> = self.ticks.lock().drain(..).collect();
        let ran = ticks.len();
        for task in ticks {
            task();
        }
        ran
    }

    pub(crate) fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_posted() + self.run_ticks();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Poll `future` to completion, turning the loop whenever it stalls.
    pub(crate) fn drive<F: Future>(&self, future: F) -> F::Output {
        let mut future = Box::pin(future);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
            assert!(self.run_until_idle() > 0, "future stalled on an idle loop");
        }
    }

    pub(crate) fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Make the next periodic timer request panic, like a runtime-less spawn.
    pub(crate) fn fail_next_timer(&self) {
        self.fail_next_timer.store(true, Ordering::SeqCst);
    }
}

impl EventLoop for ManualLoop {
    fn native_handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    fn future_tick(&self, task: LoopTask) {
        self.ticks.lock().push_back(task);
    }

    fn add_timer(&self, interval: Duration, _task: LoopTask) -> TimerId {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        self.timers.lock().insert(id, interval);
        id
    }

    fn add_periodic_timer(&self, interval: Duration, _task: PeriodicTask) -> TimerId {
        if self.fail_next_timer.swap(false, Ordering::SeqCst) {
            panic!("timer could not be armed");
        }
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        self.timers.lock().insert(id, interval);
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        self.timers.lock().remove(&id);
    }
}

type Responder = Box<dyn Fn(&NativeRequest) -> NativeReply + Send + Sync>;

enum Script {
    Reply(Responder),
    Reject(NativeError),
    Swallow,
}

/// Backend whose replies come from a closure, recording every request.
pub(crate) struct ScriptedBackend {
    script: Script,
    requests: Mutex<Vec<NativeRequest>>,
}

impl ScriptedBackend {
    pub(crate) fn replying(
        responder: impl Fn(&NativeRequest) -> NativeReply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with(Script::Reply(Box::new(responder)))
    }

    pub(crate) fn rejecting(err: NativeError) -> Arc<Self> {
        Self::with(Script::Reject(err))
    }

    /// Accepts requests and drops their callbacks unanswered.
    pub(crate) fn swallowing() -> Arc<Self> {
        Self::with(Script::Swallow)
    }

    fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<NativeRequest> {
        self.requests.lock().clone()
    }
}

impl NativeBackend for ScriptedBackend {
    fn submit(
        &self,
        handle: &LoopHandle,
        request: NativeRequest,
        callback: NativeCallback,
    ) -> Result<(), NativeError> {
        self.requests.lock().push(request.clone());
        match &self.script {
            Script::Reply(responder) => {
                let reply = responder(&request);
                handle.post(Box::new(move || callback(reply)))
            }
            Script::Reject(err) => Err(err.clone()),
            Script::Swallow => Ok(()),
        }
    }
}

/// Clock frozen until advanced.
pub(crate) struct ManualClock {
    nanos: AtomicU64,
    wall: DateTime<Utc>,
}

impl ManualClock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            nanos: AtomicU64::new(0),
            wall: Utc
                .timestamp_opt(1_600_000_000, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    pub(crate) fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.wall
    }

    fn hrtime(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
