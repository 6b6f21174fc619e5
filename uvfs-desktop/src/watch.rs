//! Change subscriptions through `notify`.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::{debug, trace};
use uvfs_traits::{
    BridgeError, ChangeKind, NativeSubscription, RawChangeEvent, Result, WatchCallback,
    WatchSource,
};

/// [`WatchSource`] backed by the platform's recommended `notify` watcher.
///
/// Watches are non-recursive. Names are reported relative to the watched
/// path; an event on the path itself carries no name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatchSource;

impl NotifyWatchSource {
    pub fn new() -> Self {
        Self
    }
}

impl WatchSource for NotifyWatchSource {
    fn watch(
        &self,
        path: &Path,
        mut callback: WatchCallback,
    ) -> Result<Box<dyn NativeSubscription>> {
        let root = path.to_path_buf();
        let canonical = path.canonicalize().ok();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let Some(kind) = change_kind(&event.kind) else {
                    return;
                };
                for changed in &event.paths {
                    let name = relative_name(&root, canonical.as_deref(), changed);
                    trace!(path = %changed.display(), ?kind, "Native change");
                    callback(Ok(RawChangeEvent::new(name, kind)));
                }
            }
            Err(err) => callback(Err(BridgeError::WatchFailed(err.to_string()))),
        })
        .map_err(|e| BridgeError::WatchFailed(e.to_string()))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| BridgeError::WatchFailed(e.to_string()))?;
        debug!(path = %path.display(), "Subscribed to changes");

        Ok(Box::new(NotifySubscription {
            path: path.to_path_buf(),
            watcher: Some(watcher),
        }))
    }
}

struct NotifySubscription {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl NativeSubscription for NotifySubscription {
    fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let _ = watcher.unwatch(&self.path);
            debug!(path = %self.path.display(), "Unsubscribed from changes");
        }
    }
}

/// `None` for access events, which never count as changes.
fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(ChangeKind::Rename)
        }
        _ => Some(ChangeKind::Change),
    }
}

fn relative_name(root: &Path, canonical: Option<&Path>, changed: &Path) -> Option<String> {
    let relative = changed
        .strip_prefix(root)
        .ok()
        .or_else(|| canonical.and_then(|c| changed.strip_prefix(c).ok()));

    match relative {
        Some(rel) if rel.as_os_str().is_empty() => None,
        Some(rel) => Some(rel.to_string_lossy().into_owned()),
        None => changed
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    }
}
