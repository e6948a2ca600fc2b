//! flow-model
//!
//! Declarative model entities for an instancing-oriented engine. A model entity
//! loads a mesh and an optional animation asynchronously, decides whether its
//! mesh is drawn directly or through GPU instancing, carries child entities on
//! named joints (sockets) and plays one animation over itself and every model
//! attached to it, in step with a document clock.
//!
//! High-level modules
//! - `context`: the services shared by all entities (loader, mesh cache, instance manager, ...)
//! - `data_structures`: transforms, mesh groups with their bone tables, bounding boxes
//! - `error`: typed load and attribute errors
//! - `model`: entities, load coordination, sockets, attachments and animation timelines
//! - `resources`: the asset loader boundary, glTF decoding and animation clips
//!

pub mod context;
pub mod data_structures;
pub mod error;
pub mod model;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use context::ModelContext;
pub use model::{EntityId, attributes::ModelAttributes, scene::ModelScene};

/// Installs the platform logger. Calling it more than once only prints a warning.
pub fn init_logger() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            web_sys::console::warn_1(&format!("Could not initialize logger: {}", e).into());
        }
    }
}
