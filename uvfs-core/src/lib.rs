//! # uvfs Core
//!
//! Bridges a callback-based native filesystem backend to future-returning
//! operations.
//!
//! ## Overview
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`bridge`] | One request in, one future out; busy counter and keep-alive timer |
//! | [`normalize`] | Collapses flag and error-code failure conventions into [`BridgeError`] |
//! | [`handles`] | Public descriptors for native file handles |
//! | [`flags`] | Symbolic open flags and permission strings |
//! | [`listing`] | Concurrent stat and classify of directory entries |
//! | [`watcher`] | Debounced change notifications |
//! | [`adapter`] | Every filesystem operation, built on the above |
//!
//! ## Lifecycle
//!
//! Each native request holds a [`bridge::BusyGuard`] from submission until its
//! completion callback fires. While any guard is alive a long-period timer
//! keeps the event loop from exiting. Results are delivered one loop tick
//! after the completion callback.
//!
//! ## Errors
//!
//! All operations fail with [`BridgeError`]. Nothing is retried and no
//! failure poisons the adapter.
//!
//! [`BridgeError`]: uvfs_traits::BridgeError

pub mod adapter;
pub mod bridge;
pub mod detect;
pub mod flags;
pub mod handles;
pub mod listing;
pub mod normalize;
pub mod stream;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{Adapter, AdapterBuilder, AdapterOptions, EntryFailurePolicy, Stat, CREATION_MODE};
pub use bridge::{BusyCounter, BusyGuard, CompletionBridge, Pending, KEEP_ALIVE_INTERVAL};
pub use detect::ModeTypeDetector;
pub use flags::{FlagInput, OpenFlagResolver, PermissionFlagResolver};
pub use handles::HandleTable;
pub use listing::DirectoryEntry;
pub use stream::{entry_channel, EntrySink, EntryStream};
pub use watcher::{WatchEvent, WatchStream, Watcher, DEBOUNCE_WINDOW};
