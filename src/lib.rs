//! Screen-state driven automation for the War Drone mobile game.
//!
//! The core of the crate is frame classification: given one screenshot,
//! decide which UI state the game is in (`list`, `prebattle`, `combat`,
//! `settlement`, config-defined extras) or `unknown`. Two interchangeable
//! classifiers answer that question, a template matcher built on masked
//! normalized correlation and an OCR variant built on per-region text rules.
//! Around the classifiers sit an adb bridge for capture and taps, a bot
//! loop that farms support battles, and offline threshold calibration.

pub mod android;
pub mod bot;
pub mod calibration;
pub mod config;
pub mod geometry;
pub mod vision;

pub use bot::{BotError, SupportBot};
pub use config::{BotConfig, ConfigError};
pub use vision::{ClassificationResult, OcrClassifier, StateId, TemplateClassifier};
