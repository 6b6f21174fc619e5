//! Listing Pipeline
//!
//! A directory scan fans out into one `lstat` plus type detection per entry.
//! Entries are delivered in completion order, not scan order. The pipeline
//! waits for every entry to settle before it closes its stream.

use std::path::{Path, PathBuf};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::warn;
use uvfs_traits::{NativePayload, NativeRequest, NodeDescriptor, NodeKind, Result};

use crate::adapter::{Adapter, EntryFailurePolicy, LS_FAILURE};
use crate::bridge::Pending;
use crate::detect::detect_type;
use crate::normalize::normalize;
use crate::stream::{entry_channel, EntrySink, EntryStream};

/// One classified directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub mode: u32,
    pub kind: NodeKind,
}

impl Adapter {
    /// Raw names in a directory, excluding `.` and `..`.
    pub fn scandir(&self, path: impl AsRef<Path>) -> Pending<Vec<String>> {
        self.dispatch(
            NativeRequest::Scandir {
                path: path.as_ref().to_path_buf(),
                flags: self.inner.options.ls_flags,
            },
            |reply| match normalize(reply, LS_FAILURE)? {
                NativePayload::Entries(names) => Ok(names),
                NativePayload::None => Ok(Vec::new()),
                other => Err(uvfs_traits::BridgeError::UnexpectedReply {
                    operation: "scandir",
                    reply: other.kind().to_string(),
                }),
            },
        )
    }

    /// List and classify every entry of a directory.
    ///
    /// A failed scan fails the listing. How a failed entry is treated depends
    /// on [`EntryFailurePolicy`].
    pub async fn ls(&self, path: impl AsRef<Path>) -> Result<Vec<DirectoryEntry>> {
        let path = path.as_ref().to_path_buf();
        let names = self.scandir(&path).await?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let (sink, stream) = entry_channel();
        self.process_contents(&path, names, &sink).await?;
        drop(sink);
        stream.collect_entries().await
    }

    /// Push variant of [`ls`](Self::ls).
    ///
    /// Entries arrive as soon as they are classified. A scan failure, or an
    /// entry failure under [`EntryFailurePolicy::Fail`], arrives as a final
    /// `Err` item. Must be called within a Tokio runtime.
    pub fn ls_stream(&self, path: impl AsRef<Path>) -> EntryStream<DirectoryEntry> {
        let path = path.as_ref().to_path_buf();
        let (mut sink, stream) = entry_channel();
        let scan = self.scandir(&path);
        let adapter = self.clone();

        tokio::spawn(async move {
            let outcome = match scan.await {
                Ok(names) => adapter.process_contents(&path, names, &sink).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => sink.close(),
                Err(err) => {
                    warn!(path = ?path, error = %err, "Directory listing failed");
                    sink.error(err);
                }
            }
        });

        stream
    }

    async fn process_contents(
        &self,
        base: &Path,
        names: Vec<String>,
        sink: &EntrySink<DirectoryEntry>,
    ) -> Result<()> {
        let mut pending: FuturesUnordered<_> = names
            .into_iter()
            .map(|name| self.classify(base.join(name)))
            .collect();

        let mut first_error = None;
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(entry) => {
                    sink.write(entry);
                }
                Err(err) => match self.inner.options.entry_failure {
                    EntryFailurePolicy::Skip => {
                        warn!(base = ?base, error = %err, "Skipping directory entry");
                    }
                    EntryFailurePolicy::Fail => {
                        first_error.get_or_insert(err);
                    }
                },
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn classify(&self, path: PathBuf) -> Result<DirectoryEntry> {
        let stat = self.stat(&path).await?;
        let node = NodeDescriptor::new(path, Some(stat.mode));
        let kind = detect_type(&self.inner.detectors, &node).await?;
        Ok(DirectoryEntry {
            path: node.path,
            mode: stat.mode,
            kind,
        })
    }
}
