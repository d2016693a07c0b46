//! Typed configuration schema
//!
//! The config file is json5 so the on-device copies can carry comments.
//! Every optional field gets its default here, in one place, and all
//! cross-references (anchor names, ROI keys, template names) are checked at
//! load time. A missing template *file* is not a config error; that is a
//! load-time warning handled by the classifiers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Configuration errors. All of these are fatal at construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: json5::Error,
    },
    #[error("state '{state}' references unknown anchor '{anchor}'")]
    MissingAnchor { state: String, anchor: String },
    #[error("state '{state}' references unknown ROI '{roi}'")]
    MissingRoi { state: String, roi: String },
    #[error("state '{state}' references unknown template '{template}'")]
    MissingTemplate { state: String, template: String },
    #[error("template '{template}' references unknown ROI '{roi}'")]
    MissingTemplateRoi { template: String, roi: String },
    #[error("OCR rule for ROI '{roi}' in state '{state}' must set exactly one of contains / all_contains / regex")]
    AmbiguousRule { state: String, roi: String },
    #[error("invalid regex in state '{state}': {source}")]
    BadRegex {
        state: String,
        source: regex::Error,
    },
    #[error("unknown match method '{0}' (expected ccorr_normed, sqdiff, sqdiff_normed or ccoeff_normed)")]
    UnknownMethod(String),
}

/// Screen dimensions the whole config is calibrated against. Input frames
/// must match these exactly; the classifiers never rescale.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

/// Template matcher tuning. Defaults match the values the detector was
/// calibrated with on the 1080x1920 reference device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Correlation method name: ccorr_normed / sqdiff / sqdiff_normed /
    /// ccoeff_normed.
    pub method: String,
    /// Absolute score floor below which the best state is still unknown.
    pub threshold: f32,
    /// Minimum lead over the second-best state.
    pub margin: f32,
    /// Global edge-preprocessing default; states may override.
    pub use_edges: bool,
    /// Whether template masks participate in matching.
    pub use_mask: bool,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Directory template file names are resolved against.
    pub templates_dir: PathBuf,
    /// Per-state overrides of the built-in ROI half-sizes, `[hw, hh]` px.
    pub roi_half_size: HashMap<String, [u32; 2]>,
    /// Per-state edge-preprocessing overrides.
    pub use_edges_per_state: HashMap<String, bool>,
    /// Per-state combine-mode overrides ("max" / "and_min_top2").
    pub combine_mode: HashMap<String, String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            method: "ccorr_normed".into(),
            threshold: 0.85,
            margin: 0.12,
            use_edges: true,
            use_mask: true,
            canny_low: 60.0,
            canny_high: 120.0,
            templates_dir: PathBuf::from("templates"),
            roi_half_size: HashMap::new(),
            use_edges_per_state: HashMap::new(),
            combine_mode: HashMap::new(),
        }
    }
}

/// A template-variant state added from config, beyond the four built-ins.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraStateSpec {
    pub name: String,
    /// Key into `coords` used as the ROI center.
    pub anchor: String,
    /// Template file names, resolved against `detector.templates_dir`.
    #[serde(default)]
    pub templates: Vec<String>,
    /// ROI half-size in pixels `[half_w, half_h]`.
    pub roi_half_size: Option<[u32; 2]>,
    /// Normalized offset added to the anchor.
    pub roi_offset_pct: Option<[f32; 2]>,
    /// Tri-state edge override; absent means inherit the global default.
    pub use_edges: Option<bool>,
    /// "max" (default) or "and_min_top2".
    #[serde(default)]
    pub combine_mode: Option<String>,
}

/// One OCR rule as written in the config. Exactly one of `contains`,
/// `all_contains`, `regex` must be present; this is enforced by
/// `BotConfig::validate`, and the vision layer converts the spec into its
/// typed rule form.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrRuleSpec {
    /// Key into `rois`.
    pub roi: String,
    pub contains: Option<Vec<String>>,
    pub all_contains: Option<Vec<String>>,
    pub regex: Option<String>,
    pub min_conf: Option<f32>,
    pub lang: Option<String>,
}

impl OcrRuleSpec {
    fn active_kinds(&self) -> usize {
        usize::from(self.contains.is_some())
            + usize::from(self.all_contains.is_some())
            + usize::from(self.regex.is_some())
    }
}

/// Auxiliary template bonus attached to an OCR state.
#[derive(Debug, Clone, Deserialize)]
pub struct AuxTemplateRef {
    /// Key into the `templates` registry.
    pub template: String,
    /// Correlation floor for the +0.5 bonus.
    pub min_score: Option<f32>,
}

/// An OCR-variant state definition.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrStateSpec {
    pub name: String,
    #[serde(default)]
    pub ocr: Vec<OcrRuleSpec>,
    #[serde(default)]
    pub aux_templates: Vec<AuxTemplateRef>,
}

/// OCR-variant template registry entry: an image searched for inside a
/// named ROI.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub path: PathBuf,
    /// Key into `rois`.
    pub roi: String,
}

/// Text recognition settings shared by all OCR rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Language key handed to the recognizer factory when a rule does not
    /// name one.
    pub default_lang: String,
    /// Lowercase recognized text and keywords before comparison. Off by
    /// default: the target game UI is Chinese, which has no case.
    pub fold_case: bool,
    /// ROI tiles wider than this are downscaled before recognition.
    pub max_tile_width: u32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            default_lang: "ch_sim".into(),
            fold_case: false,
            max_tile_width: 800,
        }
    }
}

/// Polling and tap behavior for the bot loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Seconds between classification polls while waiting for a state.
    pub poll_secs: f32,
    /// Seconds to wait for each screen transition before retrying the tap.
    pub transition_timeout_secs: f32,
    /// Seconds to wait for the combat phase to reach settlement.
    pub settlement_timeout_secs: f32,
    /// Tap jitter radius as a fraction of the screen size.
    pub tap_jitter_pct: f32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_secs: 1.0,
            transition_timeout_secs: 25.0,
            settlement_timeout_secs: 90.0,
            tap_jitter_pct: 0.008,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Android package to launch.
    #[serde(default = "default_package")]
    pub package: String,
    pub screen: Screen,
    /// Named anchors / tap points, normalized `[x, y]`.
    #[serde(default)]
    pub coords: HashMap<String, [f32; 2]>,
    /// Named ROIs, normalized `[cx, cy, w, h]`.
    #[serde(default)]
    pub rois: HashMap<String, [f32; 4]>,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub extra_states: Vec<ExtraStateSpec>,
    #[serde(default)]
    pub states: Vec<OcrStateSpec>,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

fn default_package() -> String {
    "com.miniclip.drone1".into()
}

impl BotConfig {
    /// Load and validate a json5 config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_str(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(cfg)
    }

    /// Parse and validate config text. Used by `load` and by tests.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: BotConfig = json5::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-reference checks. Classifier constructors repeat the checks for
    /// the names they themselves introduce (built-in anchors), so a config
    /// that passes here can still fail fast there.
    fn validate(&self) -> Result<(), ConfigError> {
        for state in &self.extra_states {
            if !self.coords.contains_key(&state.anchor) {
                return Err(ConfigError::MissingAnchor {
                    state: state.name.clone(),
                    anchor: state.anchor.clone(),
                });
            }
        }

        let template_names: Vec<&str> = self.templates.iter().map(|t| t.name.as_str()).collect();
        for tmpl in &self.templates {
            if !self.rois.contains_key(&tmpl.roi) {
                return Err(ConfigError::MissingTemplateRoi {
                    template: tmpl.name.clone(),
                    roi: tmpl.roi.clone(),
                });
            }
        }

        for state in &self.states {
            for rule in &state.ocr {
                if rule.active_kinds() != 1 {
                    return Err(ConfigError::AmbiguousRule {
                        state: state.name.clone(),
                        roi: rule.roi.clone(),
                    });
                }
                if !self.rois.contains_key(&rule.roi) {
                    return Err(ConfigError::MissingRoi {
                        state: state.name.clone(),
                        roi: rule.roi.clone(),
                    });
                }
                if let Some(pattern) = &rule.regex {
                    regex::Regex::new(pattern).map_err(|source| ConfigError::BadRegex {
                        state: state.name.clone(),
                        source,
                    })?;
                }
            }
            for aux in &state.aux_templates {
                if !template_names.contains(&aux.template.as_str()) {
                    return Err(ConfigError::MissingTemplate {
                        state: state.name.clone(),
                        template: aux.template.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
