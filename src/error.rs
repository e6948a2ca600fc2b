//! Typed failures surfaced by model entities.

use thiserror::Error;

use crate::model::loading::LoadAttribute;

/// A load that completed without producing anything usable.
///
/// These are handed to the progress reporter and logged; they never escape the
/// load coordinator.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load {attribute} '{locator}': {source}")]
    Failed {
        attribute: LoadAttribute,
        locator: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("animation asset '{locator}' contains no animation clip")]
    NoAnimationClip { locator: String },
}

/// A declarative attribute that could not be applied.
#[derive(Debug, Error, PartialEq)]
pub enum AttributeError {
    #[error("unknown model attribute '{0}'")]
    Unknown(String),
    #[error("attribute '{name}' expects a boolean, got '{value}'")]
    InvalidBool { name: String, value: String },
    #[error("attribute '{name}' expects a number of milliseconds, got '{value}'")]
    InvalidNumber { name: String, value: String },
}
