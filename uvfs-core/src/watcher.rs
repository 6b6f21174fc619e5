//! # Change Watcher
//!
//! Persistent change notifications for one path.
//!
//! The watcher holds a single native subscription and republishes its events
//! on a broadcast channel. It does not go through the completion bridge and
//! does not keep the event loop alive.
//!
//! ## Debouncing
//!
//! Backends often report one logical change as two adjacent raw events for
//! the same name (a rename followed by a change). An event whose raw name
//! equals the previous accepted event's name and that arrives within
//! [`DEBOUNCE_WINDOW`] of it is dropped. Dropped events do not move the
//! window.
//!
//! ## Names
//!
//! Emitted names are relative to the watched path with surrounding path
//! separators trimmed. `None` means the watched target itself changed.
//!
//! ## Usage
//!
//! ```ignore
//! let watcher = Watcher::new("/var/spool/inbox", &source, clock)?;
//! let mut changes = watcher.subscribe();
//! while let Some(event) = changes.recv().await {
//!     if let WatchEvent::Change { name } = event {
//!         println!("changed: {name:?}");
//!     }
//! }
//! ```
//!
//! ## Closing
//!
//! [`Watcher::close`] releases the native subscription and ends every
//! [`WatchStream`]. It is idempotent and also runs on drop. A native error
//! is published as [`WatchEvent::Error`], after which the streams end.

use std::path::{is_separator, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace, warn};
use uvfs_traits::{Clock, NativeSubscription, Result, WatchCallback, WatchSource};

/// Window within which a repeated event for the same name is dropped.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(2);

const CHANNEL_CAPACITY: usize = 256;

/// Consumer-facing watcher event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Change { name: Option<String> },
    Error { message: String },
}

// ============================================================================
// Debounce
// ============================================================================

#[derive(Debug, Default)]
struct DebounceState {
    last: Option<(Option<String>, u64)>,
}

impl DebounceState {
    /// Returns `false` when the event falls inside the window of the last one.
    fn accept(&mut self, name: &Option<String>, now: u64) -> bool {
        if let Some((last_name, last_time)) = &self.last {
            let window = u64::try_from(DEBOUNCE_WINDOW.as_nanos()).unwrap_or(u64::MAX);
            if last_name == name && now <= last_time.saturating_add(window) {
                return false;
            }
        }
        self.last = Some((name.clone(), now));
        true
    }
}

type Emitter = Arc<Mutex<Option<broadcast::Sender<WatchEvent>>>>;

// ============================================================================
// Watcher
// ============================================================================

pub struct Watcher {
    path: PathBuf,
    subscription: Mutex<Option<Box<dyn NativeSubscription>>>,
    emitter: Emitter,
}

impl Watcher {
    /// Start watching `path`. Trailing separators are dropped from the path.
    pub fn new(
        path: impl AsRef<Path>,
        source: &dyn WatchSource,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = normalize_path(path.as_ref());
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let emitter: Emitter = Arc::new(Mutex::new(Some(sender)));

        let callback_emitter = Arc::clone(&emitter);
        let mut debounce = DebounceState::default();
        let callback: WatchCallback = Box::new(move |event| match event {
            Ok(raw) => {
                if !debounce.accept(&raw.name, clock.hrtime()) {
                    trace!(name = ?raw.name, "Suppressed duplicate change event");
                    return;
                }
                let name = raw
                    .name
                    .map(|name| name.trim_matches(is_separator).to_string());
                if let Some(sender) = callback_emitter.lock().as_ref() {
                    let _ = sender.send(WatchEvent::Change { name });
                }
            }
            Err(err) => {
                warn!(error = %err, "Native watch subscription failed");
                if let Some(sender) = callback_emitter.lock().take() {
                    let _ = sender.send(WatchEvent::Error {
                        message: err.to_string(),
                    });
                }
            }
        });

        let subscription = source.watch(&path, callback)?;
        debug!(path = ?path, "Watching path");

        Ok(Self {
            path,
            subscription: Mutex::new(Some(subscription)),
            emitter,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> WatchStream {
        WatchStream {
            receiver: self.emitter.lock().as_ref().map(|sender| sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.emitter
            .lock()
            .as_ref()
            .map_or(0, |sender| sender.receiver_count())
    }

    pub fn close(&self) {
        let Some(mut subscription) = self.subscription.lock().take() else {
            return;
        };
        subscription.close();
        self.emitter.lock().take();
        debug!(path = ?self.path, "Closed watcher");
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.lock().is_none()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drops trailing separators only. A bare root, or a path that is not valid
/// UTF-8, is kept as given.
fn normalize_path(path: &Path) -> PathBuf {
    match path.to_str().map(|raw| raw.trim_end_matches(is_separator)) {
        Some(trimmed) if !trimmed.is_empty() => PathBuf::from(trimmed),
        _ => path.to_path_buf(),
    }
}

/// Subscription to a [`Watcher`]'s events.
#[derive(Debug)]
pub struct WatchStream {
    receiver: Option<broadcast::Receiver<WatchEvent>>,
}

impl WatchStream {
    /// Next event, or `None` once the watcher is closed.
    ///
    /// Events missed by a lagging subscriber are skipped.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Watch subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        use broadcast::error::TryRecvError;

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uvfs_traits::{BridgeError, ChangeKind, RawChangeEvent};

    #[derive(Default)]
    struct FakeSource {
        callback: Arc<Mutex<Option<WatchCallback>>>,
        closes: Arc<AtomicUsize>,
        watched: Mutex<Option<PathBuf>>,
    }

    struct FakeSubscription {
        closes: Arc<AtomicUsize>,
    }

    impl NativeSubscription for FakeSubscription {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WatchSource for FakeSource {
        fn watch(
            &self,
            path: &Path,
            callback: WatchCallback,
        ) -> Result<Box<dyn NativeSubscription>> {
            *self.watched.lock() = Some(path.to_path_buf());
            *self.callback.lock() = Some(callback);
            Ok(Box::new(FakeSubscription {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    impl FakeSource {
        fn fire(&self, name: Option<&str>) {
            if let Some(callback) = self.callback.lock().as_mut() {
                callback(Ok(RawChangeEvent::new(name, ChangeKind::Change)));
            }
        }

        fn fail(&self, message: &str) {
            if let Some(callback) = self.callback.lock().as_mut() {
                callback(Err(BridgeError::WatchFailed(message.to_string())));
            }
        }
    }

    fn setup() -> (FakeSource, Arc<ManualClock>, Watcher) {
        let source = FakeSource::default();
        let clock = ManualClock::new();
        let watcher = Watcher::new("/tmp/watched/", &source, clock.clone()).unwrap();
        (source, clock, watcher)
    }

    fn change(name: Option<&str>) -> WatchEvent {
        WatchEvent::Change {
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn path_drops_trailing_separator() {
        let (source, _clock, watcher) = setup();
        assert_eq!(watcher.path(), Path::new("/tmp/watched"));
        assert_eq!(
            source.watched.lock().clone(),
            Some(PathBuf::from("/tmp/watched"))
        );
    }

    #[test]
    fn path_keeps_interior_segments() {
        let source = FakeSource::default();
        let clock = ManualClock::new();

        let watcher = Watcher::new("/watched//a/./b//", &source, clock.clone()).unwrap();
        assert_eq!(watcher.path().as_os_str(), "/watched//a/./b");

        let root = Watcher::new("/", &source, clock).unwrap();
        assert_eq!(root.path().as_os_str(), "/");
    }

    #[test]
    fn events_within_window_are_collapsed() {
        let (source, clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fire(Some("file"));
        clock.advance(Duration::from_millis(1));
        source.fire(Some("file"));

        assert_eq!(stream.try_recv(), Some(change(Some("file"))));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn events_outside_window_are_kept() {
        let (source, clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fire(Some("file"));
        clock.advance(Duration::from_millis(5));
        source.fire(Some("file"));

        assert_eq!(stream.try_recv(), Some(change(Some("file"))));
        assert_eq!(stream.try_recv(), Some(change(Some("file"))));
    }

    #[test]
    fn different_names_are_not_collapsed() {
        let (source, _clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fire(Some("a"));
        source.fire(Some("b"));
        source.fire(Some("a"));

        assert_eq!(stream.try_recv(), Some(change(Some("a"))));
        assert_eq!(stream.try_recv(), Some(change(Some("b"))));
        assert_eq!(stream.try_recv(), Some(change(Some("a"))));
    }

    #[test]
    fn suppressed_event_does_not_extend_window() {
        let (source, clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fire(Some("f"));
        clock.advance(Duration::from_micros(1500));
        source.fire(Some("f"));
        clock.advance(Duration::from_micros(1500));
        source.fire(Some("f"));

        assert_eq!(stream.try_recv(), Some(change(Some("f"))));
        assert_eq!(stream.try_recv(), Some(change(Some("f"))));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn names_are_trimmed_and_none_passes_through() {
        let (source, clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fire(Some("/nested/"));
        clock.advance(Duration::from_millis(3));
        source.fire(None);

        assert_eq!(stream.try_recv(), Some(change(Some("nested"))));
        assert_eq!(stream.try_recv(), Some(change(None)));
    }

    #[test]
    fn close_is_idempotent() {
        let (source, _clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        watcher.close();
        watcher.close();
        assert!(watcher.is_closed());
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);
        assert_eq!(stream.try_recv(), None);
        assert_eq!(watcher.subscriber_count(), 0);

        drop(watcher);
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_subscription() {
        let (source, _clock, watcher) = setup();
        drop(watcher);
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn native_error_is_published_then_stream_ends() {
        let (source, _clock, watcher) = setup();
        let mut stream = watcher.subscribe();

        source.fail("inotify limit reached");
        assert_eq!(
            stream.recv().await,
            Some(WatchEvent::Error {
                message: "Watch failed: inotify limit reached".to_string()
            })
        );
        assert_eq!(stream.recv().await, None);
    }
}
