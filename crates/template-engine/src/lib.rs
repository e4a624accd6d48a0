//! Medley Template Engine
//!
//! A template is a named graph of render-engine sub-steps, each tagged with
//! a display title. At load time the engine turns those titles into a slot
//! table — `slot name -> (step id, input key)` — and derives a capability
//! descriptor (declared input slots, parent arity). Per-request binding is
//! then an O(1) lookup, and "this template has no such slot" is a
//! first-class fact rather than a runtime string search.
//!
//! Parent-asset resolution turns a node's parent set into staged local
//! input references: rendered outputs are copied into the engine's input
//! area (idempotently), staged uploads are bound directly, and two-parent
//! single-slot templates are fed through the dedicated merge template
//! first.

pub mod catalog;
pub mod resolve;
pub mod template;

pub use catalog::*;
pub use resolve::*;
pub use template::*;
