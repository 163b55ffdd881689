//! HTTP API: configuration, routing, and request/response mapping.

pub mod app;
pub mod config;

pub use app::{AppServices, build_app};
pub use config::{AppConfig, ConfigError, StorageConfig};
