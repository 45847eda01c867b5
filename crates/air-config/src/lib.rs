//! # air-config
//!
//! Configuration system for the AIR policy engine. Reads from `air.toml` and
//! environment variables, in that precedence order, with CLI flags applied on top.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::AirConfig;
pub use schema::{
    ConfigWarning, EngineConfig, KillSwitchConfig, LedgerConfig, LoggingConfig, ServerConfig,
    TrustConfig, WarningSeverity,
};
