//! # air-core
//!
//! Core types and primitives for the AIR policy decision engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! the unified error type and the episode records consumed from the episode store.

pub mod episode;
pub mod error;
pub mod types;

pub use episode::{Episode, EpisodeStatus, Step};
pub use error::{AirError, Result};
pub use types::*;
