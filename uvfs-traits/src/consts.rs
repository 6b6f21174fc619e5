//! Numeric flag and mode constants exchanged with native backends.
//!
//! Values follow the Linux ABI. Backends on other platforms translate from
//! these values rather than passing them through.

// Open flags
pub const O_RDONLY: u32 = 0o0;
pub const O_WRONLY: u32 = 0o1;
pub const O_RDWR: u32 = 0o2;
pub const O_CREAT: u32 = 0o100;
pub const O_EXCL: u32 = 0o200;
pub const O_TRUNC: u32 = 0o1000;
pub const O_APPEND: u32 = 0o2000;

/// Mask selecting the access mode bits of an open flag set.
pub const O_ACCMODE: u32 = 0o3;

// Permission bits
pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;
pub const S_IRGRP: u32 = 0o040;
pub const S_IWGRP: u32 = 0o020;
pub const S_IXGRP: u32 = 0o010;
pub const S_IROTH: u32 = 0o004;
pub const S_IWOTH: u32 = 0o002;
pub const S_IXOTH: u32 = 0o001;

// File type bits
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Symlink flag marking the target as a directory (meaningful on Windows).
pub const UV_FS_SYMLINK_DIR: u32 = 1;
/// Symlink flag requesting a junction point (Windows only).
pub const UV_FS_SYMLINK_JUNCTION: u32 = 2;
