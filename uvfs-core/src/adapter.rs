//! Filesystem Adapter
//!
//! Future-returning filesystem operations built on the [`CompletionBridge`].
//!
//! Single-request operations return a [`Pending`] that is dispatched
//! eagerly: the native request is submitted when the method is called, not
//! when the future is first polled. Composite operations (`touch`,
//! `get_contents`, `put_contents`, `append_contents`) are `async` and chain
//! several bridged requests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uvfs_traits::{
    BridgeError, Clock, EventLoop, Fd, NativeBackend, NativePayload, NativeReply, NativeRequest,
    NativeStat, NodeDescriptor, NodeKind, Result, SystemClock, TypeDetector, WatchSource,
};

use crate::bridge::{CompletionBridge, Pending};
use crate::detect::{detect_type, ModeTypeDetector};
use crate::flags::{FlagInput, OpenFlagResolver, PermissionFlagResolver};
use crate::handles::HandleTable;
use crate::normalize::normalize;
use crate::watcher::Watcher;

/// Permissions used by `mkdir` and `open` when the caller passes none.
pub const CREATION_MODE: &str = "rwxrwx---";

const CHMOD_FAILURE: &str = "Unable to set chmod on target";
const MKDIR_FAILURE: &str = "Unable to create directory at path";
const RMDIR_FAILURE: &str = "Unable to delete directory";
const UNLINK_FAILURE: &str = "Unable to delete the target";
const CHOWN_FAILURE: &str = "Unable to chown the target";
const STAT_FAILURE: &str = "Unable to stat the target";
pub(crate) const LS_FAILURE: &str = "Unable to list the directory";
const TOUCH_FAILURE: &str = "Unable to touch target";
const OPEN_FAILURE: &str = "Unable to open file, make sure the file exists and is readable";
const READ_FAILURE: &str = "Unable to read from the file descriptor";
const WRITE_FAILURE: &str = "Unable to write to the file descriptor";
const CLOSE_FAILURE: &str = "Unable to close the file descriptor";
const RENAME_FAILURE: &str = "Unable to rename target";
const READLINK_FAILURE: &str = "Unable to read link of target";
const SYMLINK_FAILURE: &str = "Unable to create a symlink for the target";

// ============================================================================
// Options
// ============================================================================

/// What the listing pipeline does when one entry fails to stat or classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EntryFailurePolicy {
    /// Log and leave the entry out.
    #[default]
    Skip,
    /// Fail the whole listing once every entry has settled.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdapterOptions {
    /// Flags passed to every native directory scan.
    pub ls_flags: u32,
    /// Flags passed to every native symlink request.
    pub symlink_flags: u32,
    pub entry_failure: EntryFailurePolicy,
}

impl AdapterOptions {
    pub fn with_ls_flags(mut self, flags: u32) -> Self {
        self.ls_flags = flags;
        self
    }

    pub fn with_symlink_flags(mut self, flags: u32) -> Self {
        self.symlink_flags = flags;
        self
    }

    pub fn with_entry_failure(mut self, policy: EntryFailurePolicy) -> Self {
        self.entry_failure = policy;
        self
    }
}

// ============================================================================
// Stat
// ============================================================================

/// Normalized `lstat` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    /// `-1` when the backend does not report it.
    pub blksize: i64,
    /// `-1` when the backend does not report it.
    pub blocks: i64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

impl Stat {
    fn from_native(stat: NativeStat) -> Result<Self> {
        Ok(Self {
            dev: stat.dev,
            ino: stat.ino,
            mode: stat.mode,
            nlink: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            rdev: stat.rdev,
            size: stat.size,
            blksize: stat.blksize.unwrap_or(-1),
            blocks: stat.blocks.unwrap_or(-1),
            atime: timestamp(stat.atime)?,
            mtime: timestamp(stat.mtime)?,
            ctime: timestamp(stat.ctime)?,
        })
    }

    pub fn kind(&self) -> NodeKind {
        ModeTypeDetector::classify(self.mode)
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| BridgeError::UnexpectedReply {
        operation: "lstat",
        reply: format!("timestamp out of range: {seconds}"),
    })
}

fn unexpected<T>(operation: &'static str, payload: &NativePayload) -> Result<T> {
    Err(BridgeError::UnexpectedReply {
        operation,
        reply: payload.kind().to_string(),
    })
}

fn expect_none(operation: &'static str, failure: &'static str, reply: NativeReply) -> Result<()> {
    normalize(reply, failure).map(|_| ()).map_err(|err| {
        debug!(operation, error = %err, "Native operation failed");
        err
    })
}

// ============================================================================
// Adapter
// ============================================================================

pub(crate) struct AdapterInner {
    pub(crate) bridge: CompletionBridge,
    pub(crate) handles: Arc<HandleTable>,
    pub(crate) options: AdapterOptions,
    open_flags: OpenFlagResolver,
    permissions: PermissionFlagResolver,
    pub(crate) detectors: Vec<Arc<dyn TypeDetector>>,
    clock: Arc<dyn Clock>,
}

/// Future-based filesystem adapter over a callback-based native backend.
///
/// Cloning is cheap; clones share the handle table and busy counter.
///
/// # Example
///
/// ```ignore
/// use uvfs_core::Adapter;
///
/// let adapter = Adapter::new(backend, event_loop);
/// let fd = adapter.open("/tmp/notes.txt", "cwt").await?;
/// adapter.write(fd, "hello", 0).await?;
/// adapter.close(fd).await?;
/// ```
#[derive(Clone)]
pub struct Adapter {
    pub(crate) inner: Arc<AdapterInner>,
}

impl Adapter {
    /// Adapter with default options, mode based type detection and the
    /// system clock.
    pub fn new(backend: Arc<dyn NativeBackend>, event_loop: Arc<dyn EventLoop>) -> Self {
        Self::builder(backend, event_loop).build()
    }

    pub fn builder(
        backend: Arc<dyn NativeBackend>,
        event_loop: Arc<dyn EventLoop>,
    ) -> AdapterBuilder {
        AdapterBuilder {
            backend,
            event_loop,
            options: AdapterOptions::default(),
            detectors: Vec::new(),
            clock: None,
        }
    }

    /// Submit an arbitrary native request through the bridge.
    pub fn dispatch<T, F>(&self, request: NativeRequest, mapper: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(NativeReply) -> Result<T> + Send + 'static,
    {
        self.inner.bridge.dispatch(request, mapper)
    }

    pub fn chmod<'a>(&self, path: impl AsRef<Path>, mode: impl Into<FlagInput<'a>>) -> Pending<()> {
        let mode = self.inner.permissions.resolve(mode);
        self.dispatch(
            NativeRequest::Chmod {
                path: path.as_ref().to_path_buf(),
                mode,
            },
            |reply| expect_none("chmod", CHMOD_FAILURE, reply),
        )
    }

    /// Create a directory with [`CREATION_MODE`] permissions.
    pub fn mkdir(&self, path: impl AsRef<Path>) -> Pending<()> {
        self.mkdir_with_mode(path, CREATION_MODE)
    }

    pub fn mkdir_with_mode<'a>(
        &self,
        path: impl AsRef<Path>,
        mode: impl Into<FlagInput<'a>>,
    ) -> Pending<()> {
        let mode = self.inner.permissions.resolve(mode);
        self.dispatch(
            NativeRequest::Mkdir {
                path: path.as_ref().to_path_buf(),
                mode,
            },
            |reply| expect_none("mkdir", MKDIR_FAILURE, reply),
        )
    }

    pub fn rmdir(&self, path: impl AsRef<Path>) -> Pending<()> {
        self.dispatch(
            NativeRequest::Rmdir {
                path: path.as_ref().to_path_buf(),
            },
            |reply| expect_none("rmdir", RMDIR_FAILURE, reply),
        )
    }

    pub fn unlink(&self, path: impl AsRef<Path>) -> Pending<()> {
        self.dispatch(
            NativeRequest::Unlink {
                path: path.as_ref().to_path_buf(),
            },
            |reply| expect_none("unlink", UNLINK_FAILURE, reply),
        )
    }

    pub fn chown(&self, path: impl AsRef<Path>, uid: u32, gid: u32) -> Pending<()> {
        self.dispatch(
            NativeRequest::Chown {
                path: path.as_ref().to_path_buf(),
                uid,
                gid,
            },
            |reply| expect_none("chown", CHOWN_FAILURE, reply),
        )
    }

    /// `lstat` the path. Symlinks are not followed.
    pub fn stat(&self, path: impl AsRef<Path>) -> Pending<Stat> {
        self.dispatch(
            NativeRequest::Lstat {
                path: path.as_ref().to_path_buf(),
            },
            |reply| match normalize(reply, STAT_FAILURE)? {
                NativePayload::Stat(stat) => Stat::from_native(stat),
                other => unexpected("lstat", &other),
            },
        )
    }

    /// Set access and modification times, in seconds since the epoch.
    pub fn utime(&self, path: impl AsRef<Path>, atime: i64, mtime: i64) -> Pending<()> {
        self.dispatch(
            NativeRequest::Utime {
                path: path.as_ref().to_path_buf(),
                atime,
                mtime,
            },
            |reply| expect_none("utime", TOUCH_FAILURE, reply),
        )
    }

    /// Open with [`CREATION_MODE`] permissions for any created file.
    pub fn open<'a>(&self, path: impl AsRef<Path>, flags: impl Into<FlagInput<'a>>) -> Pending<Fd> {
        self.open_with_mode(path, flags, CREATION_MODE)
    }

    pub fn open_with_mode<'a, 'b>(
        &self,
        path: impl AsRef<Path>,
        flags: impl Into<FlagInput<'a>>,
        mode: impl Into<FlagInput<'b>>,
    ) -> Pending<Fd> {
        let flags = self.inner.open_flags.resolve(flags);
        let mode = self.inner.permissions.resolve(mode);
        let handles = Arc::clone(&self.inner.handles);
        self.dispatch(
            NativeRequest::Open {
                path: path.as_ref().to_path_buf(),
                flags,
                mode,
            },
            move |reply| match normalize(reply, OPEN_FAILURE)? {
                NativePayload::Handle(handle) => Ok(handles.allocate(handle)),
                other => unexpected("open", &other),
            },
        )
    }

    /// Read up to `length` bytes at `offset`.
    pub fn read(&self, fd: Fd, length: usize, offset: u64) -> Pending<Bytes> {
        let handle = match self.inner.handles.lookup(fd) {
            Ok(handle) => handle,
            Err(err) => return Pending::settled("read", Err(err)),
        };
        self.dispatch(
            NativeRequest::Read {
                handle,
                offset,
                length,
            },
            |reply| match normalize(reply, READ_FAILURE)? {
                NativePayload::Bytes(data) => Ok(data),
                other => unexpected("read", &other),
            },
        )
    }

    /// Write `data` at `offset`, resolving to the number of bytes written.
    pub fn write(&self, fd: Fd, data: impl Into<Bytes>, offset: u64) -> Pending<usize> {
        let handle = match self.inner.handles.lookup(fd) {
            Ok(handle) => handle,
            Err(err) => return Pending::settled("write", Err(err)),
        };
        self.dispatch(
            NativeRequest::Write {
                handle,
                data: data.into(),
                offset,
            },
            |reply| match normalize(reply, WRITE_FAILURE)? {
                NativePayload::Count(written) => Ok(written),
                other => unexpected("write", &other),
            },
        )
    }

    /// Close a descriptor. The descriptor is forgotten before the native
    /// close is submitted, so it is unusable even if the close fails.
    pub fn close(&self, fd: Fd) -> Pending<()> {
        let handle = match self.inner.handles.release(fd) {
            Ok(handle) => handle,
            Err(err) => return Pending::settled("close", Err(err)),
        };
        self.dispatch(NativeRequest::Close { handle }, |reply| {
            expect_none("close", CLOSE_FAILURE, reply)
        })
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Pending<()> {
        self.dispatch(
            NativeRequest::Rename {
                from: from.as_ref().to_path_buf(),
                to: to.as_ref().to_path_buf(),
            },
            |reply| expect_none("rename", RENAME_FAILURE, reply),
        )
    }

    pub fn readlink(&self, path: impl AsRef<Path>) -> Pending<PathBuf> {
        self.dispatch(
            NativeRequest::Readlink {
                path: path.as_ref().to_path_buf(),
            },
            |reply| match normalize(reply, READLINK_FAILURE)? {
                NativePayload::Target(target) => Ok(target),
                other => unexpected("readlink", &other),
            },
        )
    }

    /// Create `to` as a symlink pointing at `from`.
    pub fn symlink(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Pending<()> {
        self.dispatch(
            NativeRequest::Symlink {
                from: from.as_ref().to_path_buf(),
                to: to.as_ref().to_path_buf(),
                flags: self.inner.options.symlink_flags,
            },
            |reply| expect_none("symlink", SYMLINK_FAILURE, reply),
        )
    }

    /// Create the file if missing, then set both times to now.
    pub async fn touch(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.append_contents(path, Bytes::new()).await?;
        let now = self.inner.clock.unix_timestamp();
        self.utime(path, now, now).await
    }

    /// Read a file. With no `length`, reads `size` bytes as reported by
    /// `stat`. The descriptor is closed whether or not the read succeeds.
    pub async fn get_contents(
        &self,
        path: impl AsRef<Path>,
        offset: u64,
        length: Option<usize>,
    ) -> Result<Bytes> {
        let path = path.as_ref();
        let length = match length {
            Some(length) => length,
            None => usize::try_from(self.stat(path).await?.size).unwrap_or(usize::MAX),
        };

        let fd = self.open(path, "r").await?;
        let read = self.read(fd, length, offset).await;
        self.close(fd).await?;
        read
    }

    /// Truncate or create the file and write `content` at offset 0.
    pub async fn put_contents(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Bytes>,
    ) -> Result<usize> {
        self.write_whole(path.as_ref(), "ctw", content.into()).await
    }

    /// Create the file if missing and append `content`.
    pub async fn append_contents(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Bytes>,
    ) -> Result<usize> {
        self.write_whole(path.as_ref(), "cwa", content.into()).await
    }

    async fn write_whole(&self, path: &Path, flags: &str, content: Bytes) -> Result<usize> {
        let fd = self.open(path, flags).await?;
        let written = self.write(fd, content, 0).await;
        self.close(fd).await?;
        written
    }

    /// Stat the path and run it through the configured type detectors.
    pub async fn detect_type(&self, path: impl AsRef<Path>) -> Result<NodeKind> {
        let path = path.as_ref();
        let stat = self.stat(path).await?;
        let node = NodeDescriptor::new(path, Some(stat.mode));
        detect_type(&self.inner.detectors, &node).await
    }

    /// Watch `path` for changes, debounced with this adapter's clock.
    pub fn watch(&self, path: impl AsRef<Path>, source: &dyn WatchSource) -> Result<Watcher> {
        Watcher::new(path, source, Arc::clone(&self.inner.clock))
    }

    /// Whether the backend can run on this host.
    pub fn is_supported(&self) -> bool {
        self.inner.bridge.backend().is_supported()
    }

    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        self.inner.bridge.event_loop()
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.inner.options
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Native requests submitted and not yet completed.
    pub fn busy_count(&self) -> usize {
        self.inner.bridge.busy_count()
    }

    pub fn keep_alive_armed(&self) -> bool {
        self.inner.bridge.keep_alive_armed()
    }

    pub fn open_handles(&self) -> usize {
        self.inner.handles.len()
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("bridge", &self.inner.bridge)
            .field("open_handles", &self.inner.handles.len())
            .field("options", &self.inner.options)
            .field("detectors", &self.inner.detectors.len())
            .finish()
    }
}

/// Builder for [`Adapter`].
pub struct AdapterBuilder {
    backend: Arc<dyn NativeBackend>,
    event_loop: Arc<dyn EventLoop>,
    options: AdapterOptions,
    detectors: Vec<Arc<dyn TypeDetector>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AdapterBuilder {
    pub fn options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a detector consulted before the built-in mode detector.
    pub fn detector(mut self, detector: Arc<dyn TypeDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Adapter {
        let mut detectors = self.detectors;
        detectors.push(Arc::new(ModeTypeDetector::new()));

        Adapter {
            inner: Arc::new(AdapterInner {
                bridge: CompletionBridge::new(self.backend, self.event_loop),
                handles: Arc::new(HandleTable::new()),
                options: self.options,
                open_flags: OpenFlagResolver::new(),
                permissions: PermissionFlagResolver::new(),
                detectors,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            }),
        }
    }
}

impl fmt::Debug for AdapterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBuilder")
            .field("backend", &"NativeBackend { ... }")
            .field("event_loop", &"EventLoop { ... }")
            .field("options", &self.options)
            .field("detectors", &self.detectors.len())
            .field("clock", &self.clock.as_ref().map(|_| "Clock { ... }"))
            .finish()
    }
}
