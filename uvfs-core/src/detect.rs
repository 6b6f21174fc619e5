//! Type detection from mode bits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;
use uvfs_traits::consts::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use uvfs_traits::{BridgeError, NodeDescriptor, NodeKind, Result, TypeDetector};

/// Classifies a node from the `S_IFMT` bits of its mode.
///
/// Defers (returns `None`) when no mode is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeTypeDetector;

impl ModeTypeDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(mode: u32) -> NodeKind {
        match mode & S_IFMT {
            S_IFREG => NodeKind::File,
            S_IFDIR => NodeKind::Directory,
            S_IFLNK => NodeKind::Link,
            _ => NodeKind::Other,
        }
    }
}

#[async_trait]
impl TypeDetector for ModeTypeDetector {
    async fn detect(&self, node: &NodeDescriptor) -> Result<Option<NodeKind>> {
        Ok(node.mode.map(Self::classify))
    }
}

/// Ask each detector in turn; the first definite answer wins.
pub async fn detect_type(
    detectors: &[Arc<dyn TypeDetector>],
    node: &NodeDescriptor,
) -> Result<NodeKind> {
    for detector in detectors {
        if let Some(kind) = detector.detect(node).await? {
            trace!(path = ?node.path, kind = kind.as_str(), "Detected node type");
            return Ok(kind);
        }
    }
    Err(BridgeError::UndetectableType(node.path.clone()))
}
