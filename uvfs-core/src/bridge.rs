//! Completion Bridge
//!
//! Turns one callback-based native request into one [`Pending`] future.
//!
//! Completion happens in two phases. The native callback (phase one) only
//! records the reply, releases the busy guard and schedules phase two with
//! [`EventLoop::future_tick`]. Phase two runs the result mapper on the next
//! loop iteration and settles the future exactly once.
//!
//! While any request is in flight a keep-alive timer is armed on the loop.
//! The timer is armed and cancelled only by [`BusyCounter`] transitions
//! between zero and non-zero.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};
use uvfs_traits::{
    BridgeError, EventLoop, NativeBackend, NativeCallback, NativeReply, NativeRequest, Result,
    TimerId,
};

/// Period of the no-op keep-alive timer.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Busy Counter
// ============================================================================

#[derive(Debug, Default)]
struct BusyState {
    count: usize,
    timer: Option<TimerId>,
}

/// Count of in-flight native requests plus the keep-alive timer it owns.
pub struct BusyCounter {
    state: Mutex<BusyState>,
    event_loop: Arc<dyn EventLoop>,
}

impl BusyCounter {
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusyState::default()),
            event_loop,
        })
    }

    /// Register one unit of work. The returned guard unregisters on drop.
    pub fn acquire(self: &Arc<Self>) -> BusyGuard {
        let mut state = self.state.lock();
        // Count only once the timer is armed, so a panicking loop leaves no trace.
        if state.count == 0 {
            let timer = self
                .event_loop
                .add_periodic_timer(KEEP_ALIVE_INTERVAL, Box::new(|| {}));
            trace!(timer = timer.0, "Armed keep-alive timer");
            state.timer = Some(timer);
        }
        state.count += 1;
        BusyGuard {
            counter: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            if let Some(timer) = state.timer.take() {
                self.event_loop.cancel_timer(timer);
                trace!(timer = timer.0, "Cancelled keep-alive timer");
            }
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn keep_alive_armed(&self) -> bool {
        self.state.lock().timer.is_some()
    }
}

impl fmt::Debug for BusyCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BusyCounter")
            .field("count", &state.count)
            .field("timer", &state.timer)
            .finish()
    }
}

/// Scoped registration on a [`BusyCounter`].
pub struct BusyGuard {
    counter: Arc<BusyCounter>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.counter.release();
    }
}

impl fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyGuard").finish_non_exhaustive()
    }
}

// ============================================================================
// Pending
// ============================================================================

enum PendingState<T> {
    Waiting(oneshot::Receiver<Result<T>>),
    Settled(Option<Result<T>>),
}

/// Future for a single bridged operation.
///
/// Dropping it does not cancel the native request; the result is discarded
/// when it arrives.
#[must_use = "futures do nothing unless polled"]
pub struct Pending<T> {
    operation: &'static str,
    state: PendingState<T>,
}

impl<T> Pending<T> {
    fn waiting(operation: &'static str, receiver: oneshot::Receiver<Result<T>>) -> Self {
        Self {
            operation,
            state: PendingState::Waiting(receiver),
        }
    }

    /// An already settled future, for failures detected before dispatch.
    pub fn settled(operation: &'static str, outcome: Result<T>) -> Self {
        Self {
            operation,
            state: PendingState::Settled(Some(outcome)),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl<T> Unpin for Pending<T> {}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            PendingState::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(outcome)) => outcome,
                Poll::Ready(Err(_)) => Err(BridgeError::Abandoned(this.operation)),
            },
            PendingState::Settled(outcome) => outcome
                .take()
                .unwrap_or(Err(BridgeError::Abandoned(this.operation))),
        };
        this.state = PendingState::Settled(None);
        Poll::Ready(outcome)
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = matches!(self.state, PendingState::Settled(_));
        f.debug_struct("Pending")
            .field("operation", &self.operation)
            .field("settled", &settled)
            .finish()
    }
}

// ============================================================================
// Completion Bridge
// ============================================================================

/// Single entry point for every one-shot native request.
pub struct CompletionBridge {
    backend: Arc<dyn NativeBackend>,
    event_loop: Arc<dyn EventLoop>,
    busy: Arc<BusyCounter>,
}

impl CompletionBridge {
    pub fn new(backend: Arc<dyn NativeBackend>, event_loop: Arc<dyn EventLoop>) -> Self {
        let busy = BusyCounter::new(Arc::clone(&event_loop));
        Self {
            backend,
            event_loop,
            busy,
        }
    }

    /// Submit `request` and settle the returned future with `mapper`'s result.
    ///
    /// Invalid requests settle immediately without touching the backend or
    /// the busy counter. A synchronous submission failure settles with
    /// [`BridgeError::DispatchFailed`].
    pub fn dispatch<T, F>(&self, request: NativeRequest, mapper: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(NativeReply) -> Result<T> + Send + 'static,
    {
        let operation = request.operation();
        if let Err(err) = request.validate() {
            return Pending::settled(operation, Err(err));
        }

        let guard = self.busy.acquire();
        let (sender, receiver) = oneshot::channel();
        let event_loop = Arc::clone(&self.event_loop);

        // Dropping this callback without invoking it releases the guard too.
        let callback: NativeCallback = Box::new(move |reply: NativeReply| {
            drop(guard);
            event_loop.future_tick(Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| mapper(reply)))
                    .unwrap_or_else(|payload| {
                        Err(BridgeError::CallbackPanicked(panic_message(payload.as_ref())))
                    });
                if sender.send(outcome).is_err() {
                    trace!(operation, "Result discarded, future was dropped");
                }
            }));
        });

        trace!(operation, "Dispatching native request");
        match self
            .backend
            .submit(&self.event_loop.native_handle(), request, callback)
        {
            Ok(()) => Pending::waiting(operation, receiver),
            Err(err) => {
                warn!(operation, error = %err, "Native dispatch failed");
                Pending::settled(operation, Err(BridgeError::DispatchFailed(err)))
            }
        }
    }

    pub fn busy_count(&self) -> usize {
        self.busy.count()
    }

    pub fn keep_alive_armed(&self) -> bool {
        self.busy.keep_alive_armed()
    }

    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        &self.event_loop
    }

    pub fn backend(&self) -> &Arc<dyn NativeBackend> {
        &self.backend
    }
}

impl fmt::Debug for CompletionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBridge")
            .field("backend", &"NativeBackend { ... }")
            .field("event_loop", &"EventLoop { ... }")
            .field("busy", &self.busy)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualLoop, ScriptedBackend};
    use std::path::PathBuf;
    use uvfs_traits::{NativeError, NativePayload};

    fn lstat(path: &str) -> NativeRequest {
        NativeRequest::Lstat {
            path: PathBuf::from(path),
        }
    }

    fn bridge_with(backend: Arc<ScriptedBackend>) -> (Arc<ManualLoop>, CompletionBridge) {
        let event_loop = ManualLoop::new();
        let bridge = CompletionBridge::new(backend, event_loop.clone());
        (event_loop, bridge)
    }

    #[test]
    fn keep_alive_follows_busy_count() {
        let backend = ScriptedBackend::replying(|_| NativeReply::ok(NativePayload::None));
        let (event_loop, bridge) = bridge_with(backend);

        let first = bridge.dispatch(lstat("/a"), |_| Ok(()));
        let second = bridge.dispatch(lstat("/b"), |_| Ok(()));
        assert_eq!(bridge.busy_count(), 2);
        assert!(bridge.keep_alive_armed());
        assert_eq!(event_loop.active_timers(), 1);

        event_loop.run_until_idle();
        assert_eq!(bridge.busy_count(), 0);
        assert!(!bridge.keep_alive_armed());
        assert_eq!(event_loop.active_timers(), 0);

        assert!(futures::executor::block_on(first).is_ok());
        assert!(futures::executor::block_on(second).is_ok());
    }

    #[test]
    fn resolution_waits_for_next_tick() {
        let backend = ScriptedBackend::replying(|_| NativeReply::ok(NativePayload::Count(4)));
        let (event_loop, bridge) = bridge_with(backend);

        let mut pending = bridge.dispatch(lstat("/a"), |reply| match reply.payload {
            NativePayload::Count(n) => Ok(n),
            _ => Ok(0),
        });

        // Deliver the native completion only.
        assert_eq!(event_loop.run_posted(), 1);
        assert_eq!(bridge.busy_count(), 0);
        assert!(futures::FutureExt::now_or_never(&mut pending).is_none());

        event_loop.run_ticks();
        assert_eq!(futures::executor::block_on(pending).unwrap(), 4);
    }

    #[test]
    fn sync_dispatch_failure_unwinds() {
        let backend = ScriptedBackend::rejecting(NativeError::Rejected("boom".into()));
        let (event_loop, bridge) = bridge_with(backend.clone());

        let pending = bridge.dispatch(lstat("/a"), |_| Ok(()));
        assert_eq!(bridge.busy_count(), 0);
        assert!(!bridge.keep_alive_armed());
        assert_eq!(event_loop.active_timers(), 0);
        assert_eq!(backend.calls(), 1);

        let err = futures::executor::block_on(pending).unwrap_err();
        assert!(matches!(err, BridgeError::DispatchFailed(_)));
    }

    #[test]
    fn invalid_request_never_reaches_backend() {
        let backend = ScriptedBackend::replying(|_| NativeReply::ok(NativePayload::None));
        let (_event_loop, bridge) = bridge_with(backend.clone());

        let pending = bridge.dispatch(lstat(""), |_| Ok(()));
        assert_eq!(backend.calls(), 0);
        assert_eq!(bridge.busy_count(), 0);
        assert!(matches!(
            futures::executor::block_on(pending),
            Err(BridgeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn mapper_error_and_panic_reject() {
        let backend = ScriptedBackend::replying(|_| NativeReply::ok(NativePayload::None));
        let (event_loop, bridge) = bridge_with(backend);

        let failing = bridge.dispatch(lstat("/a"), |_| -> Result<()> {
            Err(BridgeError::operation_failed("nope", None))
        });
        let panicking =
            bridge.dispatch(lstat("/b"), |_| -> Result<()> { panic!("mapper exploded") });
        event_loop.run_until_idle();

        assert_eq!(
            futures::executor::block_on(failing).unwrap_err().to_string(),
            "nope"
        );
        match futures::executor::block_on(panicking) {
            Err(BridgeError::CallbackPanicked(message)) => assert_eq!(message, "mapper exploded"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(bridge.busy_count(), 0);
    }

    #[test]
    fn failed_keep_alive_arm_leaves_counter_untouched() {
        let backend = ScriptedBackend::replying(|_| NativeReply::ok(NativePayload::None));
        let (event_loop, bridge) = bridge_with(backend);

        event_loop.fail_next_timer();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            bridge.dispatch(lstat("/a"), |_| Ok(()))
        }));
        assert!(outcome.is_err());
        assert_eq!(bridge.busy_count(), 0);
        assert!(!bridge.keep_alive_armed());

        let pending = bridge.dispatch(lstat("/b"), |_| Ok(()));
        assert_eq!(bridge.busy_count(), 1);
        assert!(bridge.keep_alive_armed());
        assert_eq!(event_loop.active_timers(), 1);

        event_loop.run_until_idle();
        assert!(futures::executor::block_on(pending).is_ok());
        assert_eq!(bridge.busy_count(), 0);
        assert_eq!(event_loop.active_timers(), 0);
    }

    #[test]
    fn dropped_callback_is_abandoned() {
        let backend = ScriptedBackend::swallowing();
        let (_event_loop, bridge) = bridge_with(backend);

        let pending = bridge.dispatch(lstat("/a"), |_| Ok(()));
        assert_eq!(bridge.busy_count(), 0);
        assert!(matches!(
            futures::executor::block_on(pending),
            Err(BridgeError::Abandoned("lstat"))
        ));
    }
}
