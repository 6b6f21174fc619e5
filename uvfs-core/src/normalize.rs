//! Reply normalization.
//!
//! Backends report failure either as a `false` flag or as a negative error
//! code. [`normalize`] is the single place that tells them apart.

use tracing::debug;
use uvfs_traits::{BridgeError, NativePayload, NativeReply, NativeStatus, Result};

/// Known native error codes as `(code, name, description)`.
///
/// Codes follow the libuv convention of negated errno values on Unix.
const ERROR_CODES: &[(i64, &str, &str)] = &[
    (-1, "EPERM", "operation not permitted"),
    (-2, "ENOENT", "no such file or directory"),
    (-4, "EINTR", "interrupted system call"),
    (-5, "EIO", "i/o error"),
    (-9, "EBADF", "bad file descriptor"),
    (-11, "EAGAIN", "resource temporarily unavailable"),
    (-12, "ENOMEM", "not enough memory"),
    (-13, "EACCES", "permission denied"),
    (-16, "EBUSY", "resource busy or locked"),
    (-17, "EEXIST", "file already exists"),
    (-18, "EXDEV", "cross-device link not permitted"),
    (-20, "ENOTDIR", "not a directory"),
    (-21, "EISDIR", "illegal operation on a directory"),
    (-22, "EINVAL", "invalid argument"),
    (-23, "ENFILE", "file table overflow"),
    (-24, "EMFILE", "too many open files"),
    (-26, "ETXTBSY", "text file is busy"),
    (-27, "EFBIG", "file too large"),
    (-28, "ENOSPC", "no space left on device"),
    (-30, "EROFS", "read-only file system"),
    (-31, "EMLINK", "too many links"),
    (-32, "EPIPE", "broken pipe"),
    (-36, "ENAMETOOLONG", "name too long"),
    (-38, "ENOSYS", "function not implemented"),
    (-39, "ENOTEMPTY", "directory not empty"),
    (-40, "ELOOP", "too many symbolic links encountered"),
    (-95, "ENOTSUP", "operation not supported on socket"),
    (-125, "ECANCELED", "operation canceled"),
    (-4094, "UNKNOWN", "unknown error"),
    (-4095, "EOF", "end of file"),
];

/// Look up the symbolic name and description of a native error code.
pub fn describe_code(code: i64) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(known, _, _)| *known == code)
        .map(|(_, name, description)| (*name, *description))
}

/// Collapse either failure convention into one `Result`.
///
/// `failure` is the per-operation message used when no better description
/// is available.
pub fn normalize(reply: NativeReply, failure: &'static str) -> Result<NativePayload> {
    match reply.status {
        NativeStatus::Flag(true) => Ok(reply.payload),
        NativeStatus::Code(code) if code >= 0 => Ok(reply.payload),
        NativeStatus::Flag(false) => Err(BridgeError::operation_failed(failure, None)),
        NativeStatus::Code(code) => {
            let message = match describe_code(code) {
                Some((name, description)) => format!("{name}: {description}"),
                None => {
                    debug!(code, "Unmapped native error code");
                    failure.to_string()
                }
            };
            Err(BridgeError::operation_failed(message, Some(code)))
        }
    }
}
