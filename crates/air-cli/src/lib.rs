//! # air-cli
//!
//! Command-line interface for the AIR policy engine.
//!
//! ## Commands
//!
//! - `air serve`: Start the policy engine HTTP API
//! - `air tiers`: Show the autonomy tier matrix
//! - `air check`: Validate a policy document
//! - `air config`: Show the effective configuration
//! - `air completions`: Generate shell completions

pub mod commands;

pub use commands::Cli;
