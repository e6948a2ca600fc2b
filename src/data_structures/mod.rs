//! Engine data structures: transforms, mesh groups and bounding volumes.
//!
//! - `instance` holds decomposed transforms and their raw GPU layout
//! - `mesh_group` is the arena-backed subtree produced by one asset load
//! - `bounds` holds oriented boxes anchored to an entity

pub mod bounds;
pub mod instance;
pub mod mesh_group;
