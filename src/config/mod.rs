//! Configuration module
//!
//! Loads the json5 bot configuration (screen geometry, anchors, ROI tables,
//! detector tuning, state definitions) and validates it eagerly so that a
//! classifier either constructs fully or not at all.

pub mod schema;

pub use schema::{
    AuxTemplateRef, BotConfig, ConfigError, DetectorSettings, ExtraStateSpec, OcrRuleSpec,
    OcrSettings, OcrStateSpec, Screen, TemplateSpec, TimingSettings,
};
