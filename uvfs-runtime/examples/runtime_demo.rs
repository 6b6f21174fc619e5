//! Desktop walkthrough of the bridge.
//!
//! Run with:
//! ```bash
//! cargo run -p uvfs-runtime --features desktop-shims --example runtime_demo
//! cargo run -p uvfs-runtime --features desktop-shims --example runtime_demo -- json
//! ```

use std::env;
use std::time::Duration;

use tracing::{info, warn};
use uvfs_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use uvfs_runtime::RuntimeConfig;
use uvfs_traits::LogLevel;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let format = match env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };
    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(LogLevel::Debug),
    )?;

    let workdir = tempfile::tempdir()?;
    let config = RuntimeConfig::builder().build()?;
    let adapter = config.build_adapter();
    info!(config = ?config, "Adapter ready");

    let watcher = config.watch(workdir.path())?;
    let mut events = watcher.subscribe();

    let file = workdir.path().join("demo.txt");
    adapter.put_contents(&file, "hello from uvfs\n").await?;
    adapter.append_contents(&file, "second line\n").await?;
    let contents = adapter.get_contents(&file, 0, None).await?;
    info!(bytes = contents.len(), "Read back file");

    let stat = adapter.stat(&file).await?;
    info!(size = stat.size, mtime = %stat.mtime, kind = stat.kind().as_str(), "Stat");

    adapter.mkdir(workdir.path().join("nested")).await?;
    for entry in adapter.ls(workdir.path()).await? {
        info!(path = %entry.path.display(), kind = entry.kind.as_str(), "Entry");
    }

    match adapter.stat(workdir.path().join("missing")).await {
        Ok(_) => warn!("Unexpected stat success"),
        Err(err) => info!(error = %err, code = ?err.code(), "Expected failure"),
    }

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        info!(?event, "Watch event");
    }
    watcher.close();

    info!(busy = adapter.busy_count(), "Done");
    Ok(())
}
