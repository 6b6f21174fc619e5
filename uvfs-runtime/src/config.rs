//! # Runtime Configuration
//!
//! Builds a [`RuntimeConfig`] holding the collaborators and options an
//! [`Adapter`] needs.
//!
//! ## Required Collaborators
//!
//! - `EventLoop` - delivers completions and runs the keep-alive timer
//! - `NativeBackend` - executes native requests
//!
//! ## Optional Collaborators
//!
//! - `TypeDetector` - consulted before the built-in mode detector
//! - `WatchSource` - needed only for [`RuntimeConfig::watch`]
//! - `Clock` - defaults to [`SystemClock`]
//!
//! With the `desktop-shims` feature, `TokioEventLoop`, `BlockingBackend` and
//! `NotifyWatchSource` fill in whatever was not injected. The desktop event
//! loop spawns a Tokio task, so `build()` must then run inside a runtime.
//!
//! ## Usage
//!
//! ```ignore
//! use uvfs_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .entry_failure(EntryFailurePolicy::Fail)
//!     .build()?;
//! let adapter = config.build_adapter();
//! let listing = adapter.ls("/tmp").await?;
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use uvfs_core::{Adapter, AdapterOptions, EntryFailurePolicy, Watcher};
use uvfs_traits::consts::{UV_FS_SYMLINK_DIR, UV_FS_SYMLINK_JUNCTION};
use uvfs_traits::{Clock, EventLoop, NativeBackend, SystemClock, TypeDetector, WatchSource};

use crate::error::{Error, Result};
use crate::logging::{self, LoggingConfig};

/// Collaborators and options for one adapter.
///
/// Use [`RuntimeConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub adapter_options: AdapterOptions,
    pub logging: LoggingConfig,
    pub event_loop: Arc<dyn EventLoop>,
    pub backend: Arc<dyn NativeBackend>,
    /// Consulted in order, before the built-in mode detector.
    pub detectors: Vec<Arc<dyn TypeDetector>>,
    pub watch_source: Option<Arc<dyn WatchSource>>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("adapter_options", &self.adapter_options)
            .field("logging", &self.logging)
            .field("event_loop", &"EventLoop { ... }")
            .field("backend", &"NativeBackend { ... }")
            .field("detectors", &self.detectors.len())
            .field(
                "watch_source",
                &self.watch_source.as_ref().map(|_| "WatchSource { ... }"),
            )
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Check option consistency and backend support.
    pub fn validate(&self) -> Result<()> {
        let known = UV_FS_SYMLINK_DIR | UV_FS_SYMLINK_JUNCTION;
        if self.adapter_options.symlink_flags & !known != 0 {
            return Err(Error::Config(format!(
                "Unknown symlink flags {:#x}. Only UV_FS_SYMLINK_DIR and \
                 UV_FS_SYMLINK_JUNCTION are recognised.",
                self.adapter_options.symlink_flags
            )));
        }

        if !self.backend.is_supported() {
            return Err(Error::CapabilityMissing {
                capability: "NativeBackend".to_string(),
                message: "The configured NativeBackend reports it cannot run on this host. \
                          Inject a backend supported by the current platform."
                    .to_string(),
            });
        }

        logging::build_filter(&self.logging)?;
        Ok(())
    }

    /// Wire an [`Adapter`] from this configuration.
    pub fn build_adapter(&self) -> Adapter {
        let mut builder = Adapter::builder(Arc::clone(&self.backend), Arc::clone(&self.event_loop))
            .options(self.adapter_options)
            .clock(Arc::clone(&self.clock));
        for detector in &self.detectors {
            builder = builder.detector(Arc::clone(detector));
        }
        builder.build()
    }

    /// Watch `path` through the configured watch source.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<Watcher> {
        let source = self.watch_source.as_ref().ok_or_else(watch_source_missing_error)?;
        Ok(Watcher::new(path, source.as_ref(), Arc::clone(&self.clock))?)
    }
}

fn watch_source_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "WatchSource".to_string(),
        message: "No WatchSource configured. Inject one with .watch_source() or enable \
                  the 'desktop-shims' feature to use NotifyWatchSource."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_event_loop() -> Result<Arc<dyn EventLoop>> {
    Err(Error::CapabilityMissing {
        capability: "EventLoop".to_string(),
        message: "EventLoop implementation is required to deliver completions. \
                  Desktop: enable the 'desktop-shims' feature to use TokioEventLoop. \
                  Otherwise inject the host loop with .event_loop()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_event_loop() -> Result<Arc<dyn EventLoop>> {
    use uvfs_desktop::TokioEventLoop;

    if tokio::runtime::Handle::try_current().is_err() {
        return Err(Error::Internal(
            "The default TokioEventLoop must be created inside a Tokio runtime".to_string(),
        ));
    }
    let event_loop: Arc<dyn EventLoop> = TokioEventLoop::spawn();
    Ok(event_loop)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_backend() -> Result<Arc<dyn NativeBackend>> {
    Err(Error::CapabilityMissing {
        capability: "NativeBackend".to_string(),
        message: "NativeBackend implementation is required to execute filesystem requests. \
                  Desktop: enable the 'desktop-shims' feature to use BlockingBackend. \
                  Otherwise inject a backend with .backend()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_backend() -> Result<Arc<dyn NativeBackend>> {
    use uvfs_desktop::BlockingBackend;

    let backend: Arc<dyn NativeBackend> = Arc::new(BlockingBackend::new());
    Ok(backend)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_watch_source() -> Option<Arc<dyn WatchSource>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_watch_source() -> Option<Arc<dyn WatchSource>> {
    use uvfs_desktop::NotifyWatchSource;

    let source: Arc<dyn WatchSource> = Arc::new(NotifyWatchSource::new());
    Some(source)
}

/// Builder for [`RuntimeConfig`].
#[derive(Default)]
pub struct RuntimeConfigBuilder {
    adapter_options: AdapterOptions,
    logging: Option<LoggingConfig>,
    event_loop: Option<Arc<dyn EventLoop>>,
    backend: Option<Arc<dyn NativeBackend>>,
    detectors: Vec<Arc<dyn TypeDetector>>,
    watch_source: Option<Arc<dyn WatchSource>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RuntimeConfigBuilder {
    pub fn adapter_options(mut self, options: AdapterOptions) -> Self {
        self.adapter_options = options;
        self
    }

    /// Flags passed to every directory scan.
    pub fn ls_flags(mut self, flags: u32) -> Self {
        self.adapter_options.ls_flags = flags;
        self
    }

    /// Flags passed to every symlink request.
    pub fn symlink_flags(mut self, flags: u32) -> Self {
        self.adapter_options.symlink_flags = flags;
        self
    }

    pub fn entry_failure(mut self, policy: EntryFailurePolicy) -> Self {
        self.adapter_options.entry_failure = policy;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn event_loop(mut self, event_loop: Arc<dyn EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn NativeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Add a type detector. May be called more than once.
    pub fn detector(mut self, detector: Arc<dyn TypeDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn watch_source(mut self, source: Arc<dyn WatchSource>) -> Self {
        self.watch_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fill defaults, then validate.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required collaborator is absent
    ///   and no desktop default is available
    /// - [`Error::Config`] when the options are inconsistent
    pub fn build(self) -> Result<RuntimeConfig> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => provide_default_backend()?,
        };

        let event_loop = match self.event_loop {
            Some(event_loop) => event_loop,
            None => provide_default_event_loop()?,
        };

        let config = RuntimeConfig {
            adapter_options: self.adapter_options,
            logging: self.logging.unwrap_or_default(),
            event_loop,
            backend,
            detectors: self.detectors,
            watch_source: self.watch_source.or_else(provide_default_watch_source),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
        };

        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for RuntimeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfigBuilder")
            .field("adapter_options", &self.adapter_options)
            .field("event_loop", &self.event_loop.is_some())
            .field("backend", &self.backend.is_some())
            .field("detectors", &self.detectors.len())
            .field("watch_source", &self.watch_source.is_some())
            .finish()
    }
}
