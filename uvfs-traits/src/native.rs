//! Native Backend Contract
//!
//! Typed requests, raw replies and the callback-based submission trait that a
//! native filesystem implementation must provide.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;

use crate::error::{BridgeError, Result};
use crate::event_loop::LoopHandle;

/// Caller-visible file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub i32);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NativeHandle> for Fd {
    fn from(handle: NativeHandle) -> Self {
        Fd(handle.raw)
    }
}

/// Opaque handle for an open file as understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle {
    pub raw: i32,
}

impl NativeHandle {
    pub fn new(raw: i32) -> Self {
        Self { raw }
    }
}

/// One native filesystem operation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRequest {
    Chmod { path: PathBuf, mode: u32 },
    Mkdir { path: PathBuf, mode: u32 },
    Rmdir { path: PathBuf },
    Unlink { path: PathBuf },
    Chown { path: PathBuf, uid: u32, gid: u32 },
    Lstat { path: PathBuf },
    Scandir { path: PathBuf, flags: u32 },
    Utime { path: PathBuf, atime: i64, mtime: i64 },
    Open { path: PathBuf, flags: u32, mode: u32 },
    Read { handle: NativeHandle, offset: u64, length: usize },
    Write { handle: NativeHandle, data: Bytes, offset: u64 },
    Close { handle: NativeHandle },
    Rename { from: PathBuf, to: PathBuf },
    Readlink { path: PathBuf },
    Symlink { from: PathBuf, to: PathBuf, flags: u32 },
}

impl NativeRequest {
    /// Short operation name used in logs and error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            NativeRequest::Chmod { .. } => "chmod",
            NativeRequest::Mkdir { .. } => "mkdir",
            NativeRequest::Rmdir { .. } => "rmdir",
            NativeRequest::Unlink { .. } => "unlink",
            NativeRequest::Chown { .. } => "chown",
            NativeRequest::Lstat { .. } => "lstat",
            NativeRequest::Scandir { .. } => "scandir",
            NativeRequest::Utime { .. } => "utime",
            NativeRequest::Open { .. } => "open",
            NativeRequest::Read { .. } => "read",
            NativeRequest::Write { .. } => "write",
            NativeRequest::Close { .. } => "close",
            NativeRequest::Rename { .. } => "rename",
            NativeRequest::Readlink { .. } => "readlink",
            NativeRequest::Symlink { .. } => "symlink",
        }
    }

    /// Rejects requests the backend could never accept.
    ///
    /// Paths must be non-empty and must not contain interior NUL bytes.
    pub fn validate(&self) -> Result<()> {
        match self {
            NativeRequest::Chmod { path, .. }
            | NativeRequest::Mkdir { path, .. }
            | NativeRequest::Rmdir { path }
            | NativeRequest::Unlink { path }
            | NativeRequest::Chown { path, .. }
            | NativeRequest::Lstat { path }
            | NativeRequest::Scandir { path, .. }
            | NativeRequest::Utime { path, .. }
            | NativeRequest::Open { path, .. }
            | NativeRequest::Readlink { path } => check_path(self.operation(), path),
            NativeRequest::Rename { from, to } | NativeRequest::Symlink { from, to, .. } => {
                check_path(self.operation(), from)?;
                check_path(self.operation(), to)
            }
            NativeRequest::Read { .. }
            | NativeRequest::Write { .. }
            | NativeRequest::Close { .. } => Ok(()),
        }
    }
}

fn check_path(operation: &str, path: &Path) -> Result<()> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(BridgeError::InvalidRequest(format!(
            "{operation}: path must not be empty"
        )));
    }
    if raw.to_string_lossy().contains('\0') {
        return Err(BridgeError::InvalidRequest(format!(
            "{operation}: path contains a NUL byte"
        )));
    }
    Ok(())
}

/// Outcome indicator reported by the backend.
///
/// Older backends report a boolean success flag; newer ones report an integer
/// code where negative values are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Flag(bool),
    Code(i64),
}

impl NativeStatus {
    pub fn is_success(&self) -> bool {
        match self {
            NativeStatus::Flag(ok) => *ok,
            NativeStatus::Code(code) => *code >= 0,
        }
    }
}

/// Raw stat record as produced by the backend.
///
/// Times are whole seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: Option<i64>,
    pub blocks: Option<i64>,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Operation-specific result data carried by a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum NativePayload {
    None,
    Stat(NativeStat),
    Entries(Vec<String>),
    Handle(NativeHandle),
    Bytes(Bytes),
    Count(usize),
    Target(PathBuf),
}

impl NativePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            NativePayload::None => "none",
            NativePayload::Stat(_) => "stat",
            NativePayload::Entries(_) => "entries",
            NativePayload::Handle(_) => "handle",
            NativePayload::Bytes(_) => "bytes",
            NativePayload::Count(_) => "count",
            NativePayload::Target(_) => "target",
        }
    }
}

/// Raw completion delivered to a [`NativeCallback`].
#[derive(Debug, Clone, PartialEq)]
pub struct NativeReply {
    pub status: NativeStatus,
    pub payload: NativePayload,
}

impl NativeReply {
    /// Successful reply using the integer-code convention.
    pub fn ok(payload: NativePayload) -> Self {
        Self {
            status: NativeStatus::Code(0),
            payload,
        }
    }

    /// Reply using the boolean-flag convention.
    pub fn legacy(success: bool, payload: NativePayload) -> Self {
        Self {
            status: NativeStatus::Flag(success),
            payload,
        }
    }

    /// Failed reply carrying a negative native error code.
    pub fn failed(code: i64) -> Self {
        Self {
            status: NativeStatus::Code(code),
            payload: NativePayload::None,
        }
    }
}

/// Errors raised while submitting a request, before any completion exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    #[error("event loop is closed")]
    LoopClosed,

    #[error("operation not supported by backend: {0}")]
    Unsupported(&'static str),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Completion callback handed to the backend with each request.
pub type NativeCallback = Box<dyn FnOnce(NativeReply) + Send + 'static>;

/// Callback-based native filesystem.
///
/// `submit` starts the operation and returns immediately. The callback must
/// be invoked exactly once if `submit` returns `Ok`, and never if it returns
/// `Err`. Completions should be delivered through [`LoopHandle::post`] so
/// they run on the loop rather than on a worker thread.
pub trait NativeBackend: Send + Sync {
    fn submit(
        &self,
        handle: &LoopHandle,
        request: NativeRequest,
        callback: NativeCallback,
    ) -> std::result::Result<(), NativeError>;

    /// Whether this backend can run on the current host.
    fn is_supported(&self) -> bool {
        true
    }
}
