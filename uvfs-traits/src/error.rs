use std::path::PathBuf;

use thiserror::Error;

use crate::native::{Fd, NativeError};

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The request was rejected before it reached the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend refused to accept the request at all.
    #[error("Native dispatch failed: {0}")]
    DispatchFailed(#[from] NativeError),

    /// The backend accepted the request and reported a failure for it.
    #[error("{message}")]
    OperationFailed { message: String, code: Option<i64> },

    #[error("Unknown file descriptor: {0}")]
    UnknownHandle(Fd),

    #[error("Completion handler panicked: {0}")]
    CallbackPanicked(String),

    /// The native side dropped the completion without ever invoking it.
    #[error("Operation abandoned before completion: {0}")]
    Abandoned(&'static str),

    #[error("Unexpected reply for {operation}: {reply}")]
    UnexpectedReply {
        operation: &'static str,
        reply: String,
    },

    #[error("Unable to detect node type for {}", .0.display())]
    UndetectableType(PathBuf),

    #[error("Event loop is closed")]
    LoopClosed,

    #[error("Watch failed: {0}")]
    WatchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Native error code carried by an operation failure, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            BridgeError::OperationFailed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn operation_failed(message: impl Into<String>, code: Option<i64>) -> Self {
        BridgeError::OperationFailed {
            message: message.into(),
            code,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
