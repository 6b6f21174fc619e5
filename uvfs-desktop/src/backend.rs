//! Native backend on `std::fs` and the Tokio blocking pool.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uvfs_traits::consts::{O_ACCMODE, O_APPEND, O_CREAT, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY};
use uvfs_traits::{
    LoopHandle, NativeBackend, NativeCallback, NativeError, NativeHandle, NativePayload,
    NativeReply, NativeRequest, NativeStat,
};

/// `UNKNOWN` in the native error code table.
const UV_UNKNOWN: i64 = -4094;

/// Which failure convention replies use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyConvention {
    /// Negative error codes.
    #[default]
    Current,
    /// A bare `false` flag with no detail.
    Legacy,
}

/// Files opened through a backend, keyed by the id handed out as the native
/// handle. On unix the id is the raw descriptor.
#[derive(Debug, Default)]
struct OpenFiles {
    files: Mutex<HashMap<i32, Arc<File>>>,
    #[cfg(not(unix))]
    next_id: std::sync::atomic::AtomicI32,
}

impl OpenFiles {
    fn insert(&self, file: File) -> i32 {
        let id = self.id_for(&file);
        self.files.lock().insert(id, Arc::new(file));
        id
    }

    #[cfg(unix)]
    fn id_for(&self, file: &File) -> i32 {
        use std::os::unix::io::AsRawFd;
        file.as_raw_fd()
    }

    #[cfg(not(unix))]
    fn id_for(&self, _file: &File) -> i32 {
        // Skip 0..=2 so ids look like descriptors.
        3 + self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn get(&self, handle: NativeHandle) -> io::Result<Arc<File>> {
        self.files
            .lock()
            .get(&handle.raw)
            .cloned()
            .ok_or_else(bad_descriptor)
    }

    fn remove(&self, handle: NativeHandle) -> io::Result<()> {
        self.files
            .lock()
            .remove(&handle.raw)
            .map(|_| ())
            .ok_or_else(bad_descriptor)
    }

    fn len(&self) -> usize {
        self.files.lock().len()
    }
}

/// Runs every request with `std::fs` on Tokio's blocking pool and posts the
/// completion back through the loop handle.
pub struct BlockingBackend {
    files: Arc<OpenFiles>,
    convention: ReplyConvention,
}

impl BlockingBackend {
    pub fn new() -> Self {
        Self::with_convention(ReplyConvention::Current)
    }

    pub fn with_convention(convention: ReplyConvention) -> Self {
        Self {
            files: Arc::new(OpenFiles::default()),
            convention,
        }
    }

    pub fn convention(&self) -> ReplyConvention {
        self.convention
    }

    /// Files opened through this backend and not yet closed.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}

impl Default for BlockingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend for BlockingBackend {
    fn submit(
        &self,
        handle: &LoopHandle,
        request: NativeRequest,
        callback: NativeCallback,
    ) -> Result<(), NativeError> {
        if handle.is_closed() {
            return Err(NativeError::LoopClosed);
        }
        let files = Arc::clone(&self.files);
        let convention = self.convention;
        let handle = handle.clone();
        let operation = request.operation();

        let work = move || {
            let reply = match execute(&files, request) {
                Ok(payload) => NativeReply::ok(payload),
                Err(err) => {
                    debug!(operation, error = %err, "Native operation failed");
                    match convention {
                        ReplyConvention::Current => NativeReply::failed(error_code(&err)),
                        ReplyConvention::Legacy => NativeReply::legacy(false, NativePayload::None),
                    }
                }
            };
            if handle.post(Box::new(move || callback(reply))).is_err() {
                warn!(operation, "Event loop closed before completion was delivered");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(work);
            }
            Err(_) => {
                std::thread::Builder::new()
                    .name("uvfs-blocking".to_string())
                    .spawn(work)
                    .map_err(|e| NativeError::Rejected(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingBackend")
            .field("convention", &self.convention)
            .field("open_files", &self.open_files())
            .finish()
    }
}

// ============================================================================
// Execution
// ============================================================================

fn execute(files: &OpenFiles, request: NativeRequest) -> io::Result<NativePayload> {
    match request {
        NativeRequest::Chmod { path, mode } => {
            set_mode(&path, mode)?;
            Ok(NativePayload::None)
        }
        NativeRequest::Mkdir { path, mode } => {
            create_dir(&path, mode)?;
            Ok(NativePayload::None)
        }
        NativeRequest::Rmdir { path } => fs::remove_dir(path).map(|_| NativePayload::None),
        NativeRequest::Unlink { path } => fs::remove_file(path).map(|_| NativePayload::None),
        NativeRequest::Chown { path, uid, gid } => {
            change_owner(&path, uid, gid)?;
            Ok(NativePayload::None)
        }
        NativeRequest::Lstat { path } => {
            let metadata = fs::symlink_metadata(path)?;
            Ok(NativePayload::Stat(native_stat(&metadata)))
        }
        NativeRequest::Scandir { path, .. } => {
            let mut names = Vec::new();
            for entry in fs::read_dir(path)? {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(NativePayload::Entries(names))
        }
        NativeRequest::Utime { path, atime, mtime } => {
            let times = fs::FileTimes::new()
                .set_accessed(system_time(atime))
                .set_modified(system_time(mtime));
            open_for_times(&path)?.set_times(times)?;
            Ok(NativePayload::None)
        }
        NativeRequest::Open { path, flags, mode } => {
            let file = open_options(flags, mode).open(path)?;
            Ok(NativePayload::Handle(NativeHandle::new(files.insert(file))))
        }
        NativeRequest::Read {
            handle,
            offset,
            length,
        } => {
            let file = files.get(handle)?;
            let mut buffer = vec![0u8; length];
            let read = read_at(&file, &mut buffer, offset)?;
            buffer.truncate(read);
            Ok(NativePayload::Bytes(Bytes::from(buffer)))
        }
        NativeRequest::Write {
            handle,
            data,
            offset,
        } => {
            let file = files.get(handle)?;
            write_at(&file, &data, offset)?;
            Ok(NativePayload::Count(data.len()))
        }
        NativeRequest::Close { handle } => files.remove(handle).map(|_| NativePayload::None),
        NativeRequest::Rename { from, to } => fs::rename(from, to).map(|_| NativePayload::None),
        NativeRequest::Readlink { path } => fs::read_link(path).map(NativePayload::Target),
        NativeRequest::Symlink { from, to, flags } => {
            create_symlink(&from, &to, flags)?;
            Ok(NativePayload::None)
        }
    }
}

fn bad_descriptor() -> io::Error {
    #[cfg(unix)]
    {
        io::Error::from_raw_os_error(libc::EBADF)
    }
    #[cfg(not(unix))]
    {
        io::Error::new(io::ErrorKind::InvalidInput, "bad file descriptor")
    }
}

fn system_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

fn open_options(flags: u32, mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & O_ACCMODE {
        O_WRONLY => options.write(true),
        O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    if flags & O_APPEND != 0 {
        options.append(true);
    }
    if flags & O_TRUNC != 0 {
        options.truncate(true);
    }
    if flags & O_CREAT != 0 {
        if flags & O_EXCL != 0 {
            options.create_new(true);
        } else {
            options.create(true);
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options
}

#[cfg(unix)]
fn open_for_times(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(not(unix))]
fn open_for_times(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

#[cfg(unix)]
fn read_at(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read_at(&mut buffer[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(windows)]
fn read_at(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buffer.len() {
        match file.seek_read(&mut buffer[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn write_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < data.len() {
        written += file.seek_write(&data[written..], offset + written as u64)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

#[cfg(unix)]
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir(path)
}

#[cfg(unix)]
fn change_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn change_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "chown is not supported"))
}

#[cfg(unix)]
fn create_symlink(from: &Path, to: &Path, _flags: u32) -> io::Result<()> {
    std::os::unix::fs::symlink(from, to)
}

#[cfg(windows)]
fn create_symlink(from: &Path, to: &Path, flags: u32) -> io::Result<()> {
    use uvfs_traits::consts::UV_FS_SYMLINK_DIR;
    if flags & UV_FS_SYMLINK_DIR != 0 {
        std::os::windows::fs::symlink_dir(from, to)
    } else {
        std::os::windows::fs::symlink_file(from, to)
    }
}

#[cfg(unix)]
fn native_stat(metadata: &fs::Metadata) -> NativeStat {
    use std::os::unix::fs::MetadataExt;
    NativeStat {
        dev: metadata.dev(),
        ino: metadata.ino(),
        mode: metadata.mode(),
        nlink: metadata.nlink(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev(),
        size: metadata.size(),
        blksize: i64::try_from(metadata.blksize()).ok(),
        blocks: i64::try_from(metadata.blocks()).ok(),
        atime: metadata.atime(),
        mtime: metadata.mtime(),
        ctime: metadata.ctime(),
    }
}

#[cfg(not(unix))]
fn native_stat(metadata: &fs::Metadata) -> NativeStat {
    use uvfs_traits::consts::{S_IFDIR, S_IFLNK, S_IFREG};

    let kind = if metadata.file_type().is_symlink() {
        S_IFLNK
    } else if metadata.is_dir() {
        S_IFDIR
    } else {
        S_IFREG
    };
    let permissions = if metadata.permissions().readonly() {
        0o555
    } else {
        0o777
    };
    let seconds = |time: io::Result<SystemTime>| {
        time.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok())
            .unwrap_or(0)
    };
    let mtime = seconds(metadata.modified());
    NativeStat {
        mode: kind | permissions,
        nlink: 1,
        size: metadata.len(),
        blksize: None,
        blocks: None,
        atime: seconds(metadata.accessed()),
        mtime,
        ctime: seconds(metadata.created()),
        ..NativeStat::default()
    }
}

// ============================================================================
// Error codes
// ============================================================================

/// Negative native error code for an I/O error.
pub(crate) fn error_code(err: &io::Error) -> i64 {
    #[cfg(unix)]
    {
        if let Some(errno) = err.raw_os_error() {
            return errno_code(errno);
        }
    }
    kind_code(err.kind())
}

#[cfg(unix)]
fn errno_code(errno: i32) -> i64 {
    let code = match errno {
        libc::EPERM => 1,
        libc::ENOENT => 2,
        libc::EINTR => 4,
        libc::EIO => 5,
        libc::EBADF => 9,
        libc::EAGAIN => 11,
        libc::ENOMEM => 12,
        libc::EACCES => 13,
        libc::EBUSY => 16,
        libc::EEXIST => 17,
        libc::EXDEV => 18,
        libc::ENOTDIR => 20,
        libc::EISDIR => 21,
        libc::EINVAL => 22,
        libc::ENFILE => 23,
        libc::EMFILE => 24,
        libc::ETXTBSY => 26,
        libc::EFBIG => 27,
        libc::ENOSPC => 28,
        libc::EROFS => 30,
        libc::EMLINK => 31,
        libc::EPIPE => 32,
        libc::ENAMETOOLONG => 36,
        libc::ENOSYS => 38,
        libc::ENOTEMPTY => 39,
        libc::ELOOP => 40,
        libc::ECANCELED => 125,
        _ => return UV_UNKNOWN,
    };
    -code
}

fn kind_code(kind: io::ErrorKind) -> i64 {
    match kind {
        io::ErrorKind::NotFound => -2,
        io::ErrorKind::PermissionDenied => -13,
        io::ErrorKind::AlreadyExists => -17,
        io::ErrorKind::InvalidInput => -22,
        io::ErrorKind::Unsupported => -38,
        io::ErrorKind::UnexpectedEof => -4095,
        _ => UV_UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_negative_codes() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(error_code(&missing), -2);

        let other = io::Error::new(io::ErrorKind::Other, "weird");
        assert_eq!(error_code(&other), UV_UNKNOWN);
    }

    #[cfg(unix)]
    #[test]
    fn errno_values_are_normalized() {
        assert_eq!(error_code(&io::Error::from_raw_os_error(libc::ENOTEMPTY)), -39);
        assert_eq!(error_code(&io::Error::from_raw_os_error(libc::EEXIST)), -17);
    }

    #[test]
    fn exclusive_create_fails_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusive");

        assert!(open_options(O_CREAT | O_WRONLY, 0o644).open(&path).is_ok());
        let err = open_options(O_CREAT | O_EXCL | O_WRONLY, 0o644)
            .open(&path)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(error_code(&err), -17);
    }
}
