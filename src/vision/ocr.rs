//! OCR scoring: text recognition plumbing and keyword rules
//!
//! The recognizer itself is an external capability behind the
//! [`TextRecognizer`] trait; this module owns everything around it:
//! deterministic tile preprocessing (shared verbatim by production, the
//! debug CLI and calibration, because recognizer confidence is sensitive to
//! preprocessing drift), text normalization, per-state rule evaluation, and
//! the per-language engine cache.

use std::collections::HashMap;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

use crate::config::{ConfigError, OcrRuleSpec, OcrSettings};

/// OCR-side errors. Recognition failures are caught per-ROI by the
/// classifier and downgraded to "no text"; only engine construction
/// problems surface to callers.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("no recognizer available for language '{0}'")]
    NoEngine(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// One recognized line of text with the engine's confidence in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
}

/// External text-recognition capability. Implementations wrap whatever
/// engine the deployment uses; tests use scripted fakes.
pub trait TextRecognizer: Send {
    fn recognize(&mut self, tile: &GrayImage) -> Result<Vec<OcrLine>, OcrError>;
}

/// Builds a recognizer for a language key on first use.
pub type RecognizerFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn TextRecognizer>, OcrError> + Send + Sync>;

/// Per-language recognizer cache, owned by the classifier instance.
///
/// Engine construction is expensive, so handles are built lazily and
/// reused. The map lives behind a mutex so a future parallel caller cannot
/// race first-use initialization; this is a performance cache only, with no
/// correctness dependency.
pub struct EngineRegistry {
    factory: RecognizerFactory,
    engines: Mutex<HashMap<String, Box<dyn TextRecognizer>>>,
}

impl EngineRegistry {
    pub fn new(factory: RecognizerFactory) -> Self {
        Self {
            factory,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Recognize text in a preprocessed tile using the engine for `lang`,
    /// creating the engine on first use.
    pub fn recognize(&self, lang: &str, tile: &GrayImage) -> Result<Vec<OcrLine>, OcrError> {
        let mut engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        let engine = match engines.entry(lang.to_string()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => v.insert((self.factory)(lang)?),
        };
        engine.recognize(tile)
    }
}

/// Prepare an ROI tile for recognition: bound the width to cap OCR cost,
/// grayscale, light median denoise, histogram equalization for low-contrast
/// screens. Deterministic; any change here invalidates calibrated
/// min-confidence floors.
pub fn preprocess_tile(tile: &RgbImage, max_width: u32) -> GrayImage {
    let (w, h) = tile.dimensions();
    let resized;
    let tile = if max_width > 0 && w > max_width {
        let scale = max_width as f32 / w as f32;
        let new_h = ((h as f32 * scale).round() as u32).max(1);
        resized = image::imageops::resize(tile, max_width, new_h, FilterType::Triangle);
        &resized
    } else {
        tile
    };
    let gray = image::imageops::grayscale(tile);
    let denoised = imageproc::filter::median_filter(&gray, 1, 1);
    imageproc::contrast::equalize_histogram(&denoised)
}

/// Normalize recognized text for keyword comparison: drop every ASCII and
/// full-width space, trim remaining edge whitespace. Case folding is a
/// config option rather than a default because the target UI language has
/// no case.
pub fn normalize_text(s: &str, fold_case: bool) -> String {
    let stripped: String = s.chars().filter(|&c| c != ' ' && c != '\u{3000}').collect();
    let trimmed = stripped.trim();
    if fold_case {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// The predicate kinds a rule can carry; exactly one per rule.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Any recognized line contains any one keyword.
    Contains(Vec<String>),
    /// Every keyword appears in some line (lines may differ per keyword).
    AllContains(Vec<String>),
    /// Any recognized line matches the pattern (unanchored search).
    Regex(regex::Regex),
}

/// A typed, validated OCR rule scoped to one named ROI.
#[derive(Debug, Clone)]
pub struct OcrRule {
    pub roi: String,
    pub kind: RuleKind,
    pub min_conf: f32,
    pub lang: String,
}

impl OcrRule {
    /// Build from the raw config spec. Keywords are normalized once here so
    /// evaluation compares like with like.
    pub fn from_spec(
        state: &str,
        spec: &OcrRuleSpec,
        settings: &OcrSettings,
    ) -> Result<Self, ConfigError> {
        let norm_all =
            |kws: &[String]| kws.iter().map(|k| normalize_text(k, settings.fold_case)).collect();

        let kind = if let Some(kws) = &spec.contains {
            RuleKind::Contains(norm_all(kws))
        } else if let Some(kws) = &spec.all_contains {
            RuleKind::AllContains(norm_all(kws))
        } else if let Some(pattern) = &spec.regex {
            RuleKind::Regex(regex::Regex::new(pattern).map_err(|source| {
                ConfigError::BadRegex {
                    state: state.to_string(),
                    source,
                }
            })?)
        } else {
            return Err(ConfigError::AmbiguousRule {
                state: state.to_string(),
                roi: spec.roi.clone(),
            });
        };

        Ok(Self {
            roi: spec.roi.clone(),
            kind,
            min_conf: spec.min_conf.unwrap_or(0.5),
            lang: spec
                .lang
                .clone()
                .unwrap_or_else(|| settings.default_lang.clone()),
        })
    }

    /// Evaluate against normalized `(text, confidence)` lines.
    pub fn evaluate(&self, texts: &[(String, f32)]) -> bool {
        let confident = || texts.iter().filter(|(_, c)| *c >= self.min_conf);
        match &self.kind {
            RuleKind::Contains(keywords) => {
                confident().any(|(t, _)| keywords.iter().any(|kw| t.contains(kw.as_str())))
            }
            RuleKind::AllContains(keywords) => keywords
                .iter()
                .all(|kw| confident().any(|(t, _)| t.contains(kw.as_str()))),
            RuleKind::Regex(pattern) => confident().any(|(t, _)| pattern.is_match(t)),
        }
    }

    /// Pick the text/confidence shown in the diagnostic trace for a
    /// satisfied rule: the first raw line that carried a keyword, or a
    /// marker for the aggregate kinds.
    pub fn hit_label(
        &self,
        raw: &[(String, f32)],
        norm: &[(String, f32)],
    ) -> (String, f32) {
        let max_conf = norm.iter().map(|(_, c)| *c).fold(0.0f32, f32::max);
        match &self.kind {
            RuleKind::Contains(keywords) => {
                for ((raw_text, raw_conf), (norm_text, norm_conf)) in raw.iter().zip(norm) {
                    if *norm_conf >= self.min_conf
                        && keywords.iter().any(|kw| norm_text.contains(kw.as_str()))
                    {
                        return (raw_text.clone(), *raw_conf);
                    }
                }
                (String::new(), 0.0)
            }
            RuleKind::AllContains(_) => ("ALL_CONTAINS_OK".into(), max_conf),
            RuleKind::Regex(_) => ("REGEX_OK".into(), max_conf),
        }
    }
}
