//! Declarative configuration of a model entity.
//!
//! Attribute names use the markup spelling (`anim-start-time`, `cast-shadows`, ...).
//! [`Attribute::parse`] turns a name/value pair into a typed change which the
//! scene then applies to one entity.

use crate::error::AttributeError;

#[derive(Clone, Debug, PartialEq)]
pub struct ModelAttributes {
    pub src: String,
    pub anim: String,
    pub instanced: bool,
    pub cast_shadows: bool,
    pub debug: bool,
    pub anim_loop: bool,
    pub anim_enabled: bool,
    /// Document time (ms) at which the clip is at its start.
    pub anim_start_time: f64,
    /// Document time (ms) after which playback holds still.
    pub anim_pause_time: Option<f64>,
}

impl Default for ModelAttributes {
    fn default() -> Self {
        Self {
            src: String::new(),
            anim: String::new(),
            instanced: false,
            cast_shadows: true,
            debug: false,
            anim_loop: true,
            anim_enabled: true,
            anim_start_time: 0.0,
            anim_pause_time: None,
        }
    }
}

impl ModelAttributes {
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = src.into();
        self
    }

    pub fn with_anim(mut self, anim: impl Into<String>) -> Self {
        self.anim = anim.into();
        self
    }

    pub fn with_instanced(mut self, instanced: bool) -> Self {
        self.instanced = instanced;
        self
    }
}

/// One parsed attribute change.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Src(String),
    Anim(String),
    Instanced(bool),
    CastShadows(bool),
    Debug(bool),
    AnimLoop(bool),
    AnimEnabled(bool),
    AnimStartTime(f64),
    AnimPauseTime(Option<f64>),
}

fn parse_bool(name: &str, value: &str) -> Result<bool, AttributeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(AttributeError::InvalidBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_millis(name: &str, value: &str) -> Result<f64, AttributeError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|ms| ms.is_finite())
        .ok_or_else(|| AttributeError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        })
}

impl Attribute {
    pub fn parse(name: &str, value: &str) -> Result<Self, AttributeError> {
        let attribute = match name {
            "src" => Attribute::Src(value.to_string()),
            "anim" => Attribute::Anim(value.to_string()),
            "instanced" => Attribute::Instanced(parse_bool(name, value)?),
            "cast-shadows" => Attribute::CastShadows(parse_bool(name, value)?),
            "debug" => Attribute::Debug(parse_bool(name, value)?),
            "anim-loop" => Attribute::AnimLoop(parse_bool(name, value)?),
            "anim-enabled" => Attribute::AnimEnabled(parse_bool(name, value)?),
            "anim-start-time" => Attribute::AnimStartTime(parse_millis(name, value)?),
            "anim-pause-time" if value.trim().is_empty() => Attribute::AnimPauseTime(None),
            "anim-pause-time" => Attribute::AnimPauseTime(Some(parse_millis(name, value)?)),
            _ => return Err(AttributeError::Unknown(name.to_string())),
        };
        Ok(attribute)
    }
}
