//! # Desktop Collaborators
//!
//! Default implementations of the uvfs collaborator traits for desktop
//! platforms (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `EventLoop` as [`TokioEventLoop`]: a driver task draining a FIFO queue,
//!   timers as spawned Tokio tasks
//! - `NativeBackend` as [`BlockingBackend`]: `std::fs` on the blocking pool,
//!   replying with either failure convention
//! - `WatchSource` as [`NotifyWatchSource`]: `notify`'s recommended watcher
//! - `TypeDetector` as [`ModeTypeDetector`] (re-exported from `uvfs-core`)
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use uvfs_core::Adapter;
//! use uvfs_desktop::{BlockingBackend, TokioEventLoop};
//!
//! #[tokio::main]
//! async fn main() -> uvfs_traits::Result<()> {
//!     let event_loop = TokioEventLoop::spawn();
//!     let adapter = Adapter::new(Arc::new(BlockingBackend::new()), event_loop);
//!     adapter.put_contents("/tmp/hello.txt", "hello").await?;
//!     Ok(())
//! }
//! ```

mod backend;
mod event_loop;
mod watch;

pub use backend::{BlockingBackend, ReplyConvention};
pub use event_loop::TokioEventLoop;
pub use uvfs_core::ModeTypeDetector;
pub use watch::NotifyWatchSource;
