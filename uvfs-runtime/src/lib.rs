//! # uvfs Runtime
//!
//! Runtime infrastructure around the filesystem bridge:
//! - Logging and tracing setup
//! - Configuration and collaborator wiring
//!
//! ## Overview
//!
//! [`config::RuntimeConfig`] gathers the adapter options and the injected
//! collaborators, failing fast when one is missing. With the `desktop-shims`
//! feature the desktop implementations fill any gap.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat, LoggingConfig};
