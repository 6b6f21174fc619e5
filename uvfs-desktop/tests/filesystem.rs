//! End-to-end tests against the real filesystem.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use uvfs_core::{Adapter, WatchEvent};
use uvfs_desktop::{BlockingBackend, NotifyWatchSource, ReplyConvention, TokioEventLoop};
use uvfs_traits::{BridgeError, NodeKind};

fn adapter() -> Adapter {
    Adapter::new(Arc::new(BlockingBackend::new()), TokioEventLoop::spawn())
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let adapter = adapter();

    let fd = adapter.open(&path, "cw").await.unwrap();
    assert_eq!(adapter.write(fd, &b"hello world"[..], 0).await.unwrap(), 11);
    adapter.close(fd).await.unwrap();

    let fd = adapter.open(&path, "r").await.unwrap();
    let data = adapter.read(fd, 5, 6).await.unwrap();
    adapter.close(fd).await.unwrap();

    assert_eq!(&data[..], b"world");
    assert_eq!(adapter.open_handles(), 0);
    assert_eq!(adapter.busy_count(), 0);
    assert!(!adapter.keep_alive_armed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_from_plain_thread() {
    let dir = tempfile::tempdir().unwrap();
    let event_loop = TokioEventLoop::spawn();
    let adapter = Adapter::new(Arc::new(BlockingBackend::new()), event_loop.clone());

    let remote = adapter.clone();
    let path = dir.path().to_path_buf();
    let pending = std::thread::spawn(move || remote.stat(path)).join().unwrap();

    let stat = pending.await.unwrap();
    assert_eq!(stat.kind(), NodeKind::Directory);
    assert_eq!(adapter.busy_count(), 0);
    assert!(!adapter.keep_alive_armed());
    assert_eq!(event_loop.active_timers(), 0);
}

#[tokio::test]
async fn test_contents_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contents.txt");
    let adapter = adapter();

    adapter.put_contents(&path, "first").await.unwrap();
    adapter.append_contents(&path, " second").await.unwrap();

    let all = adapter.get_contents(&path, 0, None).await.unwrap();
    assert_eq!(&all[..], b"first second");

    let tail = adapter.get_contents(&path, 6, Some(6)).await.unwrap();
    assert_eq!(&tail[..], b"second");

    adapter.put_contents(&path, "x").await.unwrap();
    let replaced = adapter.get_contents(&path, 0, None).await.unwrap();
    assert_eq!(&replaced[..], b"x");
}

#[tokio::test]
async fn test_touch_creates_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("touched");
    let adapter = adapter();

    adapter.touch(&path).await.unwrap();

    let stat = adapter.stat(&path).await.unwrap();
    assert_eq!(stat.size, 0);
    assert_eq!(stat.kind(), NodeKind::File);
    assert_eq!(adapter.detect_type(&path).await.unwrap(), NodeKind::File);
}

#[tokio::test]
async fn test_directory_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    let adapter = adapter();

    adapter.mkdir(&sub).await.unwrap();
    assert_eq!(adapter.detect_type(&sub).await.unwrap(), NodeKind::Directory);
    assert!(adapter.ls(&sub).await.unwrap().is_empty());

    adapter.put_contents(sub.join("a.txt"), "a").await.unwrap();
    let entries = adapter.ls(&sub).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path.file_name().unwrap(), "a.txt");
    assert_eq!(entries[0].kind, NodeKind::File);

    adapter.unlink(sub.join("a.txt")).await.unwrap();
    adapter.rmdir(&sub).await.unwrap();
    assert!(!sub.exists());
}

#[tokio::test]
async fn test_ls_stream_yields_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter();
    for name in ["one", "two", "three"] {
        adapter.put_contents(dir.path().join(name), name).await.unwrap();
    }

    let mut names: Vec<String> = adapter
        .ls_stream(dir.path())
        .map(|entry| {
            let entry = entry.unwrap();
            entry.path.file_name().unwrap().to_string_lossy().into_owned()
        })
        .collect()
        .await;
    names.sort();

    assert_eq!(names, vec!["one", "three", "two"]);
}

#[tokio::test]
async fn test_rename_and_missing_target() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("from");
    let to = dir.path().join("to");
    let adapter = adapter();

    adapter.touch(&from).await.unwrap();
    adapter.rename(&from, &to).await.unwrap();

    let err = adapter.stat(&from).await.unwrap_err();
    assert_eq!(err.code(), Some(-2));
    assert_eq!(err.to_string(), "ENOENT: no such file or directory");
    assert!(to.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_and_readlink() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    let link = dir.path().join("link");
    let adapter = adapter();

    adapter.touch(&target).await.unwrap();
    adapter.symlink(&target, &link).await.unwrap();

    assert_eq!(adapter.readlink(&link).await.unwrap(), target);
    assert_eq!(adapter.detect_type(&link).await.unwrap(), NodeKind::Link);
}

#[cfg(unix)]
#[tokio::test]
async fn test_chmod_applies_permission_string() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perm");
    let adapter = adapter();

    adapter.touch(&path).await.unwrap();
    adapter.chmod(&path, "rw-r-----").await.unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o640);
}

#[tokio::test]
async fn test_legacy_convention_uses_operation_message() {
    let dir = tempfile::tempdir().unwrap();
    let backend = BlockingBackend::with_convention(ReplyConvention::Legacy);
    let adapter = Adapter::new(Arc::new(backend), TokioEventLoop::spawn());

    let err = adapter.rmdir(dir.path().join("missing")).await.unwrap_err();

    assert!(matches!(err, BridgeError::OperationFailed { code: None, .. }));
    assert_eq!(err.to_string(), "Unable to delete directory");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_reports_created_file() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter();

    let watcher = adapter.watch(dir.path(), &NotifyWatchSource::new()).unwrap();
    let mut events = watcher.subscribe();

    std::fs::write(dir.path().join("new.txt"), b"data").unwrap();

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == (WatchEvent::Change { name: Some("new.txt".to_string()) }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(found);
    watcher.close();
    assert!(watcher.is_closed());
}
