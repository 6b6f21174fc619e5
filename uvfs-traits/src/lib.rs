//! # uvfs Collaborator Traits
//!
//! Contracts between the uvfs bridge core and the things it talks to but does
//! not own.
//!
//! ## Overview
//!
//! The bridge converts a callback-based native filesystem backend into
//! future-returning operations. Everything on the far side of that bridge is
//! described here as a trait so that each host can plug in its own
//! implementation (the `uvfs-desktop` crate ships tokio/std based ones):
//!
//! ### Native I/O
//! - [`NativeBackend`](native::NativeBackend) - Accepts typed
//!   [`NativeRequest`](native::NativeRequest)s and later invokes a completion
//!   callback with a raw [`NativeReply`](native::NativeReply)
//!
//! ### Scheduling
//! - [`EventLoop`](event_loop::EventLoop) - `future_tick`, timers and the
//!   [`LoopHandle`](event_loop::LoopHandle) used to deliver completions
//!
//! ### Node Model
//! - [`TypeDetector`](detect::TypeDetector) - Classifies a path/mode pair into a
//!   [`NodeKind`](detect::NodeKind)
//!
//! ### Change Notification
//! - [`WatchSource`](watch::WatchSource) - Persistent native change subscriptions
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall clock plus a monotonic high-resolution timer
//!
//! ## Error Handling
//!
//! All fallible contracts use [`BridgeError`](error::BridgeError). Backends
//! report operation failures *inside* the reply (boolean flag or negative
//! code); only a failure to even submit a request surfaces as
//! [`NativeError`](native::NativeError).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`. Completions are funnelled onto the loop
//! through [`LoopHandle`](event_loop::LoopHandle), so state touched by
//! callbacks has a single writer even when backend work runs on a pool.

pub mod consts;
pub mod detect;
pub mod error;
pub mod event_loop;
pub mod native;
pub mod time;
pub mod watch;

pub use error::{BridgeError, Result};

// Re-export commonly used types
pub use detect::{NodeDescriptor, NodeKind, TypeDetector};
pub use event_loop::{EventLoop, LoopHandle, LoopTask, PeriodicTask, TimerId};
pub use native::{
    Fd, NativeBackend, NativeCallback, NativeError, NativeHandle, NativePayload, NativeReply,
    NativeRequest, NativeStat, NativeStatus,
};
pub use time::{Clock, LogLevel, SystemClock};
pub use watch::{ChangeKind, NativeSubscription, RawChangeEvent, WatchCallback, WatchSource};
