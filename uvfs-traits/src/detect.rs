//! Node type detection contract.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Classification of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
    Link,
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
            NodeKind::Link => "link",
            NodeKind::Other => "other",
        }
    }
}

/// What a detector gets to look at.
///
/// `mode` is absent when the caller asks about a path it has not stat'ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub path: PathBuf,
    pub mode: Option<u32>,
}

impl NodeDescriptor {
    pub fn new(path: impl Into<PathBuf>, mode: Option<u32>) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }
}

/// Type detection collaborator.
///
/// Detectors are consulted in order; the first `Some` wins.
#[async_trait]
pub trait TypeDetector: Send + Sync {
    /// Classify a node, or return `Ok(None)` to defer to the next detector.
    async fn detect(&self, node: &NodeDescriptor) -> Result<Option<NodeKind>>;
}
