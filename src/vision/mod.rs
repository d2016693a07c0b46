//! Vision and screen-state classification
//!
//! Two classifier variants share this module: the template matcher
//! ([`classifier::TemplateClassifier`]) scores masked correlation against
//! per-state landmark templates, and the OCR variant
//! ([`classifier::OcrClassifier`]) counts text-rule hits plus auxiliary
//! template bonuses. Both answer the same question per frame, "which UI
//! state is this, or unknown", and both return the full per-state score
//! table with diagnostics so the debug CLI and calibration reports can see
//! why a frame was decided the way it was.

pub mod classifier;
pub mod matching;
pub mod ocr;
pub mod template;

use std::collections::BTreeMap;

use serde::Serialize;

pub use classifier::{CombineMode, OcrClassifier, TemplateClassifier};
pub use matching::{MatchMethod, MatchResult};
pub use ocr::{EngineRegistry, OcrError, OcrLine, TextRecognizer};
pub use template::Template;

/// Name of the reserved fallback state.
pub const UNKNOWN_STATE: &str = "unknown";

/// Identifier of a classification target.
///
/// One open set: the four built-in states (`list`, `prebattle`, `combat`,
/// `settlement`) are ordinary entries seeded by the template classifier, and
/// config-defined states join the same namespace. `unknown` is reserved for
/// the ambiguous outcome and is never a configured state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_STATE.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_STATE
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One recognized text line in one ROI, kept both raw and normalized for
/// diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoiText {
    pub raw: Vec<(String, f32)>,
    pub norm: Vec<(String, f32)>,
}

/// A satisfied OCR rule, for the diagnostic trace.
#[derive(Debug, Clone, Serialize)]
pub struct OcrHit {
    pub roi: String,
    pub text: String,
    pub confidence: f32,
}

/// Everything one state contributed to a classification call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateTrace {
    /// Per-template match results (template variant).
    pub matches: Vec<MatchResult>,
    /// Satisfied OCR rules (OCR variant).
    pub ocr_hits: Vec<OcrHit>,
    /// Auxiliary template bonuses that fired: (template name, score).
    pub template_hits: Vec<(String, f32)>,
    /// Raw/normalized text observed per ROI (OCR variant).
    pub ocr_raw: BTreeMap<String, RoiText>,
}

/// Outcome of one classification call.
///
/// `state` is `unknown` when the best score missed the threshold, the lead
/// over the runner-up was too small, or (OCR variant) the top score tied or
/// was zero. The score table and traces are always fully populated; they
/// are a required output for the debug CLI and calibration, not optional
/// telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub state: StateId,
    pub score: f32,
    /// Template file name that produced the winning score, when applicable.
    pub template: Option<String>,
    /// Top-left corner of the winning match in full-image pixels.
    pub location: Option<(u32, u32)>,
    /// Fused score of every configured state, in state-name order.
    pub scores: BTreeMap<StateId, f32>,
    /// Per-state diagnostic detail.
    pub traces: BTreeMap<StateId, StateTrace>,
}

impl ClassificationResult {
    /// An all-zero unknown result, used when nothing produced a signal.
    pub fn unknown() -> Self {
        Self {
            state: StateId::unknown(),
            score: 0.0,
            template: None,
            location: None,
            scores: BTreeMap::new(),
            traces: BTreeMap::new(),
        }
    }
}
