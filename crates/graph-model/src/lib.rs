//! Medley Graph Model
//!
//! Defines the core data contracts for Medley generation graphs:
//! - **Assets:** Media kinds, storage classes, and the opaque asset URI
//!   scheme shared with the render engine's `/view` endpoint
//! - **Nodes:** One generation/upload step with persisted parameters,
//!   produced assets, and its parent set
//! - **Snapshots:** The canonical full-tree read model
//!
//! Despite the product naming, the node graph is a DAG: a node may have
//! multiple parents (merge/compose operations) and multiple children.

pub mod asset;
pub mod node;

pub use asset::*;
pub use node::*;
