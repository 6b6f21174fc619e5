//! Event Loop Abstraction
//!
//! The bridge never owns a loop; it schedules work on one through this trait.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::native::NativeError;

/// One-shot unit of work run on the loop.
pub type LoopTask = Box<dyn FnOnce() + Send + 'static>;

/// Repeating unit of work run by a periodic timer.
pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

/// Identifier returned when arming a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Cloneable handle native backends use to deliver completions onto the loop.
///
/// Tasks posted here run on the loop in submission order.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    sender: mpsc::UnboundedSender<LoopTask>,
}

impl LoopHandle {
    /// Create a handle and the receiving end the loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a task for the loop.
    ///
    /// Returns [`NativeError::LoopClosed`] once the loop stopped draining.
    pub fn post(&self, task: LoopTask) -> Result<(), NativeError> {
        self.sender.send(task).map_err(|_| NativeError::LoopClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Event loop collaborator.
///
/// # Example
///
/// ```ignore
/// use uvfs_traits::EventLoop;
///
/// fn later(event_loop: &dyn EventLoop) {
///     event_loop.future_tick(Box::new(|| println!("next iteration")));
/// }
/// ```
pub trait EventLoop: Send + Sync {
    /// Handle passed to native backends for completion delivery.
    fn native_handle(&self) -> LoopHandle;

    /// Run `task` on the next loop iteration, never inline.
    fn future_tick(&self, task: LoopTask);

    /// Run `task` once after `interval`.
    fn add_timer(&self, interval: Duration, task: LoopTask) -> TimerId;

    /// Run `task` every `interval` until cancelled.
    ///
    /// An armed periodic timer keeps the loop alive.
    fn add_periodic_timer(&self, interval: Duration, task: PeriodicTask) -> TimerId;

    /// Cancel a timer. Unknown or already fired ids are ignored.
    fn cancel_timer(&self, id: TimerId);
}
