//! Native change subscription contract.

use std::path::Path;

use crate::error::{BridgeError, Result};

/// Raw kind reported by the native watcher. Consumers currently ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Rename,
    Change,
}

/// One raw native change notification.
///
/// `name` is `None` when the change concerns the watched target itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeEvent {
    pub name: Option<String>,
    pub kind: ChangeKind,
}

impl RawChangeEvent {
    pub fn new(name: Option<impl Into<String>>, kind: ChangeKind) -> Self {
        Self {
            name: name.map(Into::into),
            kind,
        }
    }
}

/// Invoked for every raw event or subscription error.
pub type WatchCallback = Box<dyn FnMut(std::result::Result<RawChangeEvent, BridgeError>) + Send>;

/// Live native subscription. Dropping it must also stop delivery.
pub trait NativeSubscription: Send {
    /// Stop delivering events. Called at most once by the bridge.
    fn close(&mut self);
}

/// Source of native change subscriptions.
pub trait WatchSource: Send + Sync {
    fn watch(&self, path: &Path, callback: WatchCallback) -> Result<Box<dyn NativeSubscription>>;
}
