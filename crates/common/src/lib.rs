//! Medley Common Utilities
//!
//! Shared infrastructure for all Medley crates:
//! - Error types and result aliases
//! - Engine configuration (render-engine endpoint, storage areas)
//! - Tracing/logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
pub use logging::*;
