//! Medley Render Orchestrator
//!
//! Drives render-engine jobs end to end: submit a bound template over
//! HTTP, follow the engine's websocket event stream until the job's
//! completion signal (or the stream drops), fetch the execution history,
//! and turn the reported files into addressable output assets.
//!
//! The [`GenerationPipeline`] sits on top: it ties the template catalog,
//! parent-input resolution, orchestration, and the tree store into the
//! one flow a request travels through.

pub mod client;
pub mod orchestrator;
pub mod pipeline;

pub use client::*;
pub use orchestrator::*;
pub use pipeline::*;
