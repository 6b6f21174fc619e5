//! Workspace facade crate.
//!
//! Re-exports the `uvfs` crates behind one dependency. The `desktop-shims`
//! feature (on by default) adds the desktop collaborators and lets
//! [`RuntimeConfig`] fill in missing ones.

pub use uvfs_core;
pub use uvfs_runtime;
pub use uvfs_traits;

#[cfg(feature = "desktop-shims")]
pub use uvfs_desktop;

pub use uvfs_core::{Adapter, DirectoryEntry, Stat, WatchEvent, Watcher};
pub use uvfs_runtime::RuntimeConfig;
pub use uvfs_traits::{BridgeError, Fd, NodeKind};
