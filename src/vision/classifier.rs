//! State classifiers and fusion policy
//!
//! [`TemplateClassifier`] fuses per-template correlation scores into one
//! score per state and applies an absolute threshold plus a top-two margin.
//! [`OcrClassifier`] counts text-rule hits (+1.0 each) and auxiliary
//! template bonuses (+0.5 each) and treats exact ties as ambiguous. Both are
//! stateless between calls and deterministic for a fixed frame and config.

use std::collections::{BTreeMap, HashMap};

use image::RgbImage;

use crate::config::{BotConfig, ConfigError, OcrSettings};
use crate::geometry::Roi;

use super::matching::{best_match, edge_map, MatchMethod, MatchResult, Planes};
use super::ocr::{normalize_text, preprocess_tile, EngineRegistry, OcrRule};
use super::template::Template;
use super::{ClassificationResult, OcrHit, RoiText, StateId, StateTrace};

/// How a state's multiple template scores merge into one fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineMode {
    /// Single best template wins.
    #[default]
    Max,
    /// The lower of the top two scores: both landmarks must be convincing
    /// at once. Use for states prone to single-landmark false positives.
    AndMinTop2,
}

impl CombineMode {
    pub fn from_name(name: &str) -> Self {
        match name {
            "and_min_top2" => Self::AndMinTop2,
            _ => Self::Max,
        }
    }

    /// Fuse per-template scores. `AndMinTop2` with fewer than two scores
    /// falls back to `Max`; the classifier warns about that configuration
    /// at construction.
    pub fn fuse(self, scores: &[f32]) -> Option<f32> {
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        match self {
            _ if scores.is_empty() => None,
            CombineMode::Max => Some(max),
            CombineMode::AndMinTop2 if scores.len() >= 2 => {
                let mut sorted = scores.to_vec();
                sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                Some(sorted[1].min(sorted[0]))
            }
            CombineMode::AndMinTop2 => Some(max),
        }
    }
}

/// One template-variant state, fully resolved at construction.
#[derive(Debug, Clone)]
pub struct StateSpec {
    pub name: StateId,
    pub roi: Roi,
    /// Tri-state edge override; `None` inherits the classifier default.
    pub use_edges: Option<bool>,
    pub combine: CombineMode,
    pub templates: Vec<Template>,
}

/// Built-in state table: name, anchor key, ROI half-size, template file,
/// edge override. The support icon is a flat color block, so `combat`
/// disables edge preprocessing; Canny strips most of its signal.
const BUILTIN_STATES: [(&str, &str, (u32, u32), &str, Option<bool>); 4] = [
    ("list", "list_start", (300, 180), "btn_list_start.png", None),
    ("prebattle", "pre_start", (180, 120), "btn_pre_start.png", None),
    ("combat", "support3", (260, 260), "btn_support_icon.png", Some(false)),
    ("settlement", "collect", (280, 180), "btn_collect.png", None),
];

/// Template-matching screen-state classifier.
///
/// Owns its templates, masks and resolved ROIs; immutable and safely
/// shareable read-only once constructed. Construction fails fast on any
/// missing anchor or unknown method; missing template *files* only log a
/// warning and are skipped.
#[derive(Debug)]
pub struct TemplateClassifier {
    screen: (u32, u32),
    states: Vec<StateSpec>,
    method: MatchMethod,
    threshold: f32,
    margin: f32,
    use_edges: bool,
    use_mask: bool,
    canny: (f32, f32),
}

impl TemplateClassifier {
    pub fn new(cfg: &BotConfig) -> Result<Self, ConfigError> {
        let det = &cfg.detector;
        let method = MatchMethod::from_name(&det.method)
            .ok_or_else(|| ConfigError::UnknownMethod(det.method.clone()))?;
        let screen = (cfg.screen.width, cfg.screen.height);

        let mut states = Vec::new();

        for (name, anchor, half_size, template_file, use_edges) in BUILTIN_STATES {
            // Config may override any built-in's ROI size, edge setting or
            // combine mode without redefining the whole state.
            let half_size = det
                .roi_half_size
                .get(name)
                .map(|hs| (hs[0], hs[1]))
                .unwrap_or(half_size);
            let use_edges = det.use_edges_per_state.get(name).copied().or(use_edges);
            let combine = det
                .combine_mode
                .get(name)
                .map(|m| CombineMode::from_name(m))
                .unwrap_or_default();
            let roi = resolve_roi(cfg, name, anchor, half_size, (0.0, 0.0))?;
            let templates = load_templates(
                name,
                std::iter::once(template_file.to_string()),
                &det.templates_dir,
            );
            states.push(StateSpec {
                name: StateId::new(name),
                roi,
                use_edges,
                combine,
                templates,
            });
        }

        for extra in &cfg.extra_states {
            let half_size = extra
                .roi_half_size
                .map(|hs| (hs[0], hs[1]))
                .unwrap_or((220, 180));
            let offset = extra
                .roi_offset_pct
                .map(|o| (o[0], o[1]))
                .unwrap_or((0.0, 0.0));
            let roi = resolve_roi(cfg, &extra.name, &extra.anchor, half_size, offset)?;
            let combine = extra
                .combine_mode
                .as_deref()
                .map(CombineMode::from_name)
                .unwrap_or_default();
            let templates = load_templates(
                &extra.name,
                extra.templates.iter().cloned(),
                &det.templates_dir,
            );
            states.push(StateSpec {
                name: StateId::new(&extra.name),
                roi,
                use_edges: extra.use_edges,
                combine,
                templates,
            });
        }

        for state in &states {
            if state.combine == CombineMode::AndMinTop2 && state.templates.len() < 2 {
                log::warn!(
                    "state '{}' uses and_min_top2 with {} template(s); falling back to max",
                    state.name,
                    state.templates.len()
                );
            }
        }

        Ok(Self {
            screen,
            states,
            method,
            threshold: det.threshold,
            margin: det.margin,
            use_edges: det.use_edges,
            use_mask: det.use_mask,
            canny: (det.canny_low, det.canny_high),
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Configured states, in recognition order (built-ins first).
    pub fn states(&self) -> &[StateSpec] {
        &self.states
    }

    pub fn state_names(&self) -> Vec<StateId> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    /// Score every template of one state against the frame. Unfiltered: no
    /// threshold is applied here, that is the fusion layer's concern.
    pub fn score_state(&self, image: &RgbImage, state: &StateSpec) -> Vec<MatchResult> {
        let rect = state.roi.to_rect(self.screen.0, self.screen.1);
        if rect.is_empty() {
            return Vec::new();
        }
        let roi_img =
            image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();

        let use_edges = state.use_edges.unwrap_or(self.use_edges);
        let roi_planes = if use_edges {
            Planes::from_gray(&edge_map(&roi_img, self.canny.0, self.canny.1))
        } else {
            Planes::from_rgb(&roi_img)
        };

        let mut results = Vec::new();
        for template in &state.templates {
            let tmpl_planes = if use_edges {
                Planes::from_gray(&edge_map(&template.image, self.canny.0, self.canny.1))
            } else {
                Planes::from_rgb(&template.image)
            };
            let mask = if self.use_mask {
                template.mask.as_ref()
            } else {
                None
            };
            if let Some((score, (x, y))) = best_match(&roi_planes, &tmpl_planes, mask, self.method)
            {
                results.push(MatchResult {
                    template: template.name.clone(),
                    score,
                    location: (x + rect.x, y + rect.y),
                });
            }
        }
        results
    }

    /// Classify one frame. Frame dimensions must equal the configured
    /// screen size; that is a caller precondition, not handled here.
    pub fn classify(&self, image: &RgbImage) -> ClassificationResult {
        let mut scores = BTreeMap::new();
        let mut traces = BTreeMap::new();
        let mut candidates: Vec<(StateId, f32, MatchResult)> = Vec::new();

        for state in &self.states {
            let matches = self.score_state(image, state);
            let raw_scores: Vec<f32> = matches.iter().map(|m| m.score).collect();

            let fused = state.combine.fuse(&raw_scores);
            scores.insert(state.name.clone(), fused.unwrap_or(0.0));
            traces.insert(
                state.name.clone(),
                StateTrace {
                    matches: matches.clone(),
                    ..StateTrace::default()
                },
            );

            if let Some(fused) = fused {
                // The best single match stays the representative for
                // location/template diagnostics even under AndMinTop2.
                let best = matches
                    .iter()
                    .max_by(|a, b| {
                        a.score
                            .partial_cmp(&b.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .cloned();
                if let Some(best) = best {
                    candidates.push((state.name.clone(), fused, best));
                }
            }
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((name, fused, best)) = candidates.first().cloned() else {
            return ClassificationResult {
                scores,
                traces,
                ..ClassificationResult::unknown()
            };
        };

        let second = candidates.get(1).map(|c| c.1);
        let state = if accept_template_decision(fused, second, self.threshold, self.margin) {
            name
        } else {
            StateId::unknown()
        };

        ClassificationResult {
            state,
            score: fused,
            template: Some(best.template),
            location: Some(best.location),
            scores,
            traces,
        }
    }
}

/// Template-variant decision rule: accept the best state only when it
/// clears the absolute threshold and leads the runner-up by the margin.
fn accept_template_decision(best: f32, second: Option<f32>, threshold: f32, margin: f32) -> bool {
    if best < threshold {
        return false;
    }
    match second {
        Some(second) => (best - second) >= margin,
        None => true,
    }
}

fn resolve_roi(
    cfg: &BotConfig,
    state: &str,
    anchor: &str,
    half_size: (u32, u32),
    offset: (f32, f32),
) -> Result<Roi, ConfigError> {
    let point = cfg
        .coords
        .get(anchor)
        .ok_or_else(|| ConfigError::MissingAnchor {
            state: state.to_string(),
            anchor: anchor.to_string(),
        })?;
    Ok(Roi::from_anchor(
        *point,
        half_size,
        offset,
        (cfg.screen.width, cfg.screen.height),
    ))
}

fn load_templates(
    state: &str,
    files: impl Iterator<Item = String>,
    dir: &std::path::Path,
) -> Vec<Template> {
    let mut templates = Vec::new();
    for file in files {
        match Template::load(dir.join(&file)) {
            Ok(t) => templates.push(t),
            Err(e) => log::warn!("state '{state}': skipping template: {e}"),
        }
    }
    templates
}

/// Auxiliary template for the OCR variant: an unmasked grayscale landmark
/// searched inside a registered ROI.
struct AuxTemplate {
    image: image::GrayImage,
    roi: Roi,
}

struct AuxRef {
    name: String,
    min_score: f32,
}

struct OcrStateRules {
    name: StateId,
    rules: Vec<OcrRule>,
    aux: Vec<AuxRef>,
}

/// OCR-based screen-state classifier.
///
/// Scores accumulate in coarse steps (+1.0 per satisfied rule, +0.5 per
/// auxiliary template hit), so exact ties are common and meaningful: a tie
/// or a non-positive top score yields `unknown`.
pub struct OcrClassifier {
    screen: (u32, u32),
    rois: HashMap<String, Roi>,
    states: Vec<OcrStateRules>,
    aux_templates: HashMap<String, AuxTemplate>,
    registry: EngineRegistry,
    settings: OcrSettings,
}

impl OcrClassifier {
    pub fn new(cfg: &BotConfig, registry: EngineRegistry) -> Result<Self, ConfigError> {
        let rois: HashMap<String, Roi> = cfg
            .rois
            .iter()
            .map(|(k, v)| (k.clone(), Roi::from_fractions(*v)))
            .collect();

        let mut aux_templates = HashMap::new();
        for spec in &cfg.templates {
            let roi = *rois
                .get(&spec.roi)
                .ok_or_else(|| ConfigError::MissingTemplateRoi {
                    template: spec.name.clone(),
                    roi: spec.roi.clone(),
                })?;
            match image::open(&spec.path) {
                Ok(img) => {
                    aux_templates.insert(
                        spec.name.clone(),
                        AuxTemplate {
                            image: img.to_luma8(),
                            roi,
                        },
                    );
                }
                Err(e) => log::warn!(
                    "skipping aux template '{}' ({}): {e}",
                    spec.name,
                    spec.path.display()
                ),
            }
        }

        let mut states = Vec::new();
        for st in &cfg.states {
            let mut rules = Vec::new();
            for rule_spec in &st.ocr {
                if !rois.contains_key(&rule_spec.roi) {
                    return Err(ConfigError::MissingRoi {
                        state: st.name.clone(),
                        roi: rule_spec.roi.clone(),
                    });
                }
                rules.push(OcrRule::from_spec(&st.name, rule_spec, &cfg.ocr)?);
            }
            let aux = st
                .aux_templates
                .iter()
                .map(|a| AuxRef {
                    name: a.template.clone(),
                    min_score: a.min_score.unwrap_or(0.7),
                })
                .collect();
            states.push(OcrStateRules {
                name: StateId::new(&st.name),
                rules,
                aux,
            });
        }

        Ok(Self {
            screen: (cfg.screen.width, cfg.screen.height),
            rois,
            states,
            aux_templates,
            registry,
            settings: cfg.ocr.clone(),
        })
    }

    pub fn state_names(&self) -> Vec<StateId> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    /// Classify one frame by rule hits and auxiliary template bonuses.
    pub fn classify(&self, image: &RgbImage) -> ClassificationResult {
        let mut scores = BTreeMap::new();
        let mut traces = BTreeMap::new();

        for state in &self.states {
            let mut score = 0.0f32;
            let mut trace = StateTrace::default();

            for rule in &state.rules {
                let (raw, norm) = self.texts_in_roi(image, &rule.roi, &rule.lang);

                if rule.evaluate(&norm) {
                    score += 1.0;
                    let (text, confidence) = rule.hit_label(&raw, &norm);
                    trace.ocr_hits.push(OcrHit {
                        roi: rule.roi.clone(),
                        text,
                        confidence,
                    });
                }
                trace
                    .ocr_raw
                    .entry(rule.roi.clone())
                    .or_insert_with(|| RoiText { raw, norm });
            }

            for aux in &state.aux {
                let Some(template) = self.aux_templates.get(&aux.name) else {
                    continue;
                };
                if let Some(hit) = self.aux_template_score(image, template) {
                    if hit >= aux.min_score {
                        score += 0.5;
                        trace.template_hits.push((aux.name.clone(), hit));
                    }
                }
            }

            scores.insert(state.name.clone(), score);
            traces.insert(state.name.clone(), trace);
        }

        let mut ranked: Vec<(&StateId, f32)> = scores.iter().map(|(k, v)| (k, *v)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (state, score) = match ranked.as_slice() {
            [] => (StateId::unknown(), 0.0),
            [(name, best), rest @ ..] => {
                let tied = rest.first().is_some_and(|(_, s)| *s == *best);
                if *best <= 0.0 || tied {
                    (StateId::unknown(), *best)
                } else {
                    ((*name).clone(), *best)
                }
            }
        };

        ClassificationResult {
            state,
            score,
            template: None,
            location: None,
            scores,
            traces,
        }
    }

    /// Recognize text in a named ROI, returning raw and normalized lines.
    /// Recognition failures are downgraded to "no text" for this ROI so
    /// classification can continue on the remaining signals.
    fn texts_in_roi(
        &self,
        image: &RgbImage,
        roi_key: &str,
        lang: &str,
    ) -> (Vec<(String, f32)>, Vec<(String, f32)>) {
        let Some(roi) = self.rois.get(roi_key) else {
            return (Vec::new(), Vec::new());
        };
        let rect = roi.to_rect(self.screen.0, self.screen.1);
        if rect.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let tile =
            image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
        let prepped = preprocess_tile(&tile, self.settings.max_tile_width);

        let lines = match self.registry.recognize(lang, &prepped) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("ocr failed for roi '{roi_key}': {e}");
                Vec::new()
            }
        };

        let raw: Vec<(String, f32)> = lines.into_iter().map(|l| (l.text, l.confidence)).collect();
        let norm = raw
            .iter()
            .map(|(t, c)| (normalize_text(t, self.settings.fold_case), *c))
            .collect();
        (raw, norm)
    }

    fn aux_template_score(&self, image: &RgbImage, template: &AuxTemplate) -> Option<f32> {
        let rect = template.roi.to_rect(self.screen.0, self.screen.1);
        if rect.is_empty() {
            return None;
        }
        let tile =
            image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
        let tile_gray = image::imageops::grayscale(&tile);
        best_match(
            &Planes::from_gray(&tile_gray),
            &Planes::from_gray(&template.image),
            None,
            MatchMethod::CcorrNormed,
        )
        .map(|(score, _)| score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr::{OcrError, OcrLine, TextRecognizer};
    use image::{GrayImage, ImageBuffer, Rgb};
    use std::collections::HashMap as StdHashMap;

    fn textured(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([
                ((x * 37 + y * 11) % 251) as u8,
                ((x * 13 + y * 29) % 241) as u8,
                ((x * 7 + y * 53) % 239) as u8,
            ])
        })
    }

    /// Write a screen-sized fixture plus a template cropped from it and
    /// return a validated config whose `list` state should match.
    fn fixture_config(dir: &std::path::Path, use_edges: bool) -> (BotConfig, RgbImage) {
        let screen = textured(400, 400);
        let patch = image::imageops::crop_imm(&screen, 180, 180, 40, 40).to_image();
        patch.save(dir.join("btn_list_start.png")).unwrap();

        let text = format!(
            r#"{{
                screen: {{ width: 400, height: 400 }},
                coords: {{
                    list_start: [0.5, 0.5],
                    pre_start: [0.5, 0.9],
                    support3: [0.8, 0.85],
                    collect: [0.5, 0.88],
                }},
                detector: {{ use_edges: {use_edges}, templates_dir: "{}" }},
            }}"#,
            dir.display()
        );
        (BotConfig::from_str(&text).unwrap(), screen)
    }

    #[test]
    fn test_classify_finds_planted_list_landmark() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, screen) = fixture_config(dir.path(), false);
        let classifier = TemplateClassifier::new(&cfg).unwrap();

        let result = classifier.classify(&screen);
        assert_eq!(result.state, "list");
        assert!(result.score >= 0.85, "score={}", result.score);
        assert_eq!(result.template.as_deref(), Some("btn_list_start.png"));
        // Full score table is populated even for states with no templates.
        assert_eq!(result.scores.len(), 4);
    }

    #[test]
    fn test_classify_blank_frame_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        // Edges on: a featureless frame has no edge signal anywhere.
        let (cfg, _) = fixture_config(dir.path(), true);
        let classifier = TemplateClassifier::new(&cfg).unwrap();

        let blank: RgbImage = ImageBuffer::from_fn(400, 400, |_, _| Rgb([128, 128, 128]));
        let result = classifier.classify(&blank);
        assert!(result.state.is_unknown());
        assert!(result
            .scores
            .values()
            .all(|s| *s < classifier.threshold()));
    }

    #[test]
    fn test_classify_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, screen) = fixture_config(dir.path(), false);
        let classifier = TemplateClassifier::new(&cfg).unwrap();

        let a = classifier.classify(&screen);
        let b = classifier.classify(&screen);
        assert_eq!(a.state, b.state);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn test_missing_anchor_fails_construction() {
        let cfg = BotConfig::from_str(
            r#"{ screen: { width: 400, height: 400 }, coords: { list_start: [0.5, 0.5] } }"#,
        )
        .unwrap();
        let err = TemplateClassifier::new(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAnchor { .. }));
    }

    #[test]
    fn test_unknown_method_fails_construction() {
        let cfg = BotConfig::from_str(
            r#"{
                screen: { width: 400, height: 400 },
                coords: {
                    list_start: [0.5, 0.5], pre_start: [0.5, 0.9],
                    support3: [0.8, 0.85], collect: [0.5, 0.88],
                },
                detector: { method: "phase_corr" },
            }"#,
        )
        .unwrap();
        assert!(matches!(
            TemplateClassifier::new(&cfg),
            Err(ConfigError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_detector_overrides_reshape_builtin_states() {
        let cfg = BotConfig::from_str(
            r#"{
                screen: { width: 400, height: 400 },
                coords: {
                    list_start: [0.5, 0.5], pre_start: [0.5, 0.9],
                    support3: [0.8, 0.85], collect: [0.5, 0.88],
                },
                detector: {
                    roi_half_size: { list: [50, 40] },
                    use_edges_per_state: { list: false, combat: true },
                    combine_mode: { list: "and_min_top2" },
                },
            }"#,
        )
        .unwrap();
        let classifier = TemplateClassifier::new(&cfg).unwrap();

        let list = &classifier.states()[0];
        assert_eq!(list.name, "list");
        let rect = list.roi.to_rect(400, 400);
        assert_eq!((rect.width, rect.height), (100, 80));
        assert_eq!(list.use_edges, Some(false));
        assert_eq!(list.combine, CombineMode::AndMinTop2);

        // The combat edge default is itself overridable.
        let combat = classifier.states().iter().find(|s| s.name == "combat").unwrap();
        assert_eq!(combat.use_edges, Some(true));
    }

    #[test]
    fn test_combine_max_and_min_top2() {
        // Scenario from the tuning notes: [0.95, 0.40] must fuse to 0.40
        // under AndMinTop2 so one convincing landmark cannot carry a state.
        assert_eq!(CombineMode::Max.fuse(&[0.95, 0.40]), Some(0.95));
        assert_eq!(CombineMode::AndMinTop2.fuse(&[0.95, 0.40]), Some(0.40));
        assert_eq!(CombineMode::AndMinTop2.fuse(&[0.40, 0.95]), Some(0.40));
        assert_eq!(CombineMode::AndMinTop2.fuse(&[0.9, 0.95, 0.2]), Some(0.9));
        // Documented fallback: fewer than two templates degrades to Max.
        assert_eq!(CombineMode::AndMinTop2.fuse(&[0.95]), Some(0.95));
        assert_eq!(CombineMode::Max.fuse(&[]), None);
        assert_eq!(CombineMode::AndMinTop2.fuse(&[]), None);
    }

    #[test]
    fn test_template_decision_boundaries() {
        let (threshold, margin) = (0.85, 0.12);
        // Absolute threshold straddle.
        assert!(!accept_template_decision(0.8499, None, threshold, margin));
        assert!(accept_template_decision(0.85, None, threshold, margin));
        // Margin straddle against a runner-up.
        assert!(accept_template_decision(0.95, Some(0.83), threshold, margin));
        assert!(!accept_template_decision(0.95, Some(0.84), threshold, margin));
        // Exactly the margin is accepted; only a smaller gap is ambiguous.
        assert!(accept_template_decision(0.96, Some(0.84), threshold, margin));
    }

    // ------------------------ OCR variant ------------------------

    /// Scripted recognizer: returns fixed lines per call regardless of tile
    /// content, keyed by language.
    struct Scripted {
        lines: Vec<OcrLine>,
    }

    impl TextRecognizer for Scripted {
        fn recognize(&mut self, _tile: &GrayImage) -> Result<Vec<OcrLine>, OcrError> {
            Ok(self.lines.clone())
        }
    }

    fn scripted_registry(by_lang: StdHashMap<String, Vec<(&'static str, f32)>>) -> EngineRegistry {
        EngineRegistry::new(Box::new(move |lang| {
            let lines = by_lang
                .get(lang)
                .map(|ls| {
                    ls.iter()
                        .map(|(t, c)| OcrLine {
                            text: (*t).to_string(),
                            confidence: *c,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Box::new(Scripted { lines }) as Box<dyn TextRecognizer>)
        }))
    }

    fn ocr_config(states: &str) -> BotConfig {
        let text = format!(
            r#"{{
                screen: {{ width: 1080, height: 1920 }},
                rois: {{
                    title: [0.5, 0.08, 0.6, 0.08],
                    footer: [0.5, 0.92, 0.6, 0.08],
                }},
                states: {states},
            }}"#
        );
        BotConfig::from_str(&text).unwrap()
    }

    #[test]
    fn test_ocr_rule_hit_scores_one_point() {
        let cfg = ocr_config(
            r#"[
                { name: "list", ocr: [{ roi: "title", contains: ["开始"], min_conf: 0.5 }] },
                { name: "settlement", ocr: [{ roi: "footer", contains: ["领取"] }] },
            ]"#,
        );
        let registry = scripted_registry(StdHashMap::from([(
            "ch_sim".to_string(),
            vec![("开 始", 0.9)],
        )]));
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();

        let frame = textured(1080, 1920);
        let result = classifier.classify(&frame);
        assert_eq!(result.state, "list");
        assert!((result.score - 1.0).abs() < f32::EPSILON);
        // Both states saw the same scripted text, but only one rule matched.
        assert_eq!(result.scores[&StateId::new("settlement")], 0.0);
        let trace = &result.traces[&StateId::new("list")];
        assert_eq!(trace.ocr_hits.len(), 1);
        assert_eq!(trace.ocr_hits[0].text, "开 始");
    }

    #[test]
    fn test_ocr_tie_is_unknown_until_broken() {
        let cfg = ocr_config(
            r#"[
                { name: "list", ocr: [{ roi: "title", contains: ["战斗"] }] },
                { name: "prebattle", ocr: [
                    { roi: "title", contains: ["战斗"] },
                    { roi: "footer", contains: ["出击"] },
                ] },
            ]"#,
        );

        // Only the shared keyword appears: 1.0 vs 1.0, a meaningful tie.
        let registry = scripted_registry(StdHashMap::from([(
            "ch_sim".to_string(),
            vec![("战斗", 0.9)],
        )]));
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();
        let frame = textured(1080, 1920);
        let result = classifier.classify(&frame);
        assert!(result.state.is_unknown());
        assert!((result.score - 1.0).abs() < f32::EPSILON);

        // The extra footer keyword breaks the tie: 2.0 vs 1.0.
        let registry = scripted_registry(StdHashMap::from([(
            "ch_sim".to_string(),
            vec![("战斗", 0.9), ("出击", 0.8)],
        )]));
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();
        let result = classifier.classify(&frame);
        assert_eq!(result.state, "prebattle");
        assert!((result.score - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ocr_no_signal_is_unknown() {
        let cfg = ocr_config(r#"[{ name: "list", ocr: [{ roi: "title", contains: ["开始"] }] }]"#);
        let registry = scripted_registry(StdHashMap::new());
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();
        let result = classifier.classify(&textured(1080, 1920));
        assert!(result.state.is_unknown());
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_ocr_engine_failure_treated_as_no_text() {
        let cfg = ocr_config(
            r#"[
                { name: "list", ocr: [
                    { roi: "title", contains: ["开始"] },
                    { roi: "footer", contains: ["任务"], lang: "broken" },
                ] },
            ]"#,
        );
        let registry = EngineRegistry::new(Box::new(|lang| {
            if lang == "broken" {
                Err(OcrError::NoEngine(lang.to_string()))
            } else {
                Ok(Box::new(Scripted {
                    lines: vec![OcrLine {
                        text: "开始".into(),
                        confidence: 0.9,
                    }],
                }) as Box<dyn TextRecognizer>)
            }
        }));
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();
        let result = classifier.classify(&textured(1080, 1920));
        // The broken ROI contributes nothing; the healthy rule still fires.
        assert_eq!(result.state, "list");
        assert!((result.score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ocr_aux_template_bonus() {
        let dir = tempfile::tempdir().unwrap();
        let frame = textured(1080, 1920);

        // Carve the aux template straight out of the footer ROI region.
        let patch = image::imageops::crop_imm(&frame, 500, 1750, 60, 40).to_image();
        let patch_path = dir.path().join("collect_btn.png");
        patch.save(&patch_path).unwrap();

        let text = format!(
            r#"{{
                screen: {{ width: 1080, height: 1920 }},
                rois: {{
                    title: [0.5, 0.08, 0.6, 0.08],
                    footer: [0.5, 0.92, 0.6, 0.12],
                }},
                templates: [{{ name: "collect_btn", path: "{}", roi: "footer" }}],
                states: [
                    {{ name: "settlement",
                       ocr: [{{ roi: "title", contains: ["结算"] }}],
                       aux_templates: [{{ template: "collect_btn", min_score: 0.9 }}] }},
                    {{ name: "list", ocr: [{{ roi: "title", contains: ["列表"] }}] }},
                ],
            }}"#,
            patch_path.display()
        );
        let cfg = BotConfig::from_str(&text).unwrap();

        let registry = scripted_registry(StdHashMap::from([(
            "ch_sim".to_string(),
            vec![("结算", 0.9)],
        )]));
        let classifier = OcrClassifier::new(&cfg, registry).unwrap();
        let result = classifier.classify(&frame);

        assert_eq!(result.state, "settlement");
        assert!((result.score - 1.5).abs() < f32::EPSILON, "score={}", result.score);
        let trace = &result.traces[&StateId::new("settlement")];
        assert_eq!(trace.template_hits.len(), 1);
        assert_eq!(trace.template_hits[0].0, "collect_btn");
    }
}
