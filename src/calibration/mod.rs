//! Offline threshold calibration
//!
//! Walks a labeled screenshot dataset laid out as `dataset/<state>/*.png`
//! plus an optional `dataset/negatives/` directory, scores every sample with
//! the template classifier, and reports per-state score distributions with a
//! suggested detection threshold. The suggestion balances the weakest
//! positives against the strongest negative so both false accepts and false
//! rejects stay rare.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::vision::{StateId, TemplateClassifier};

/// Directory name for frames that belong to no configured state.
pub const NEGATIVES_DIR: &str = "negatives";

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("failed to read dataset directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write report {path}: {source}")]
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("dataset {0} contains no scorable samples")]
    EmptyDataset(PathBuf),
}

/// One scored dataset sample.
#[derive(Debug, Clone)]
pub struct SampleScore {
    /// Directory label: a state name or [`NEGATIVES_DIR`].
    pub label: String,
    pub file: PathBuf,
    /// What the classifier decided for this frame.
    pub predicted: StateId,
    /// Best raw template score for the labeled state; for negatives, the
    /// best score across all states.
    pub score: f32,
    /// Fused score of every state for this frame.
    pub scores: BTreeMap<StateId, f32>,
    /// True when the prediction disagrees with the label. Negatives
    /// misclassify by matching any state at all.
    pub misclassified: bool,
}

/// Per-state calibration summary.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub state: StateId,
    pub samples: usize,
    pub min: f32,
    pub p15: f32,
    pub max: f32,
    pub misclassified: usize,
    /// Threshold suggestion from this state's positives against the
    /// strongest negative.
    pub suggested: f32,
}

/// Full calibration report over one dataset.
#[derive(Debug)]
pub struct CalibrationReport {
    /// Configured state names, in CSV column order.
    pub states: Vec<StateId>,
    pub rows: Vec<SampleScore>,
    pub summaries: Vec<StateSummary>,
    /// Highest score any negative frame reached on any state.
    pub negative_max: f32,
    /// Global suggestion over all positives pooled; the per-state
    /// suggestions live in the summaries.
    pub suggested_threshold: f32,
}

/// Score every labeled sample in `dataset` and derive a threshold
/// suggestion. Unreadable images are skipped with a warning so one corrupt
/// screenshot cannot sink a long calibration run.
pub fn score_dataset(
    classifier: &TemplateClassifier,
    dataset: &Path,
    margin: f32,
) -> Result<CalibrationReport, CalibrationError> {
    let mut rows = Vec::new();
    let mut positives: Vec<f32> = Vec::new();
    let mut negative_max = 0.0f32;

    for state in classifier.states() {
        let dir = dataset.join(state.name.as_str());
        if !dir.is_dir() {
            log::warn!("no samples for state '{}' at {}", state.name, dir.display());
            continue;
        }
        for file in image_files(&dir)? {
            let Some(frame) = load_frame(&file) else {
                continue;
            };
            let result = classifier.classify(&frame);
            let score = classifier
                .score_state(&frame, state)
                .iter()
                .map(|m| m.score)
                .fold(0.0f32, f32::max);
            let misclassified = result.state != state.name;
            positives.push(score);
            rows.push(SampleScore {
                label: state.name.to_string(),
                file,
                predicted: result.state,
                score,
                scores: result.scores,
                misclassified,
            });
        }
    }

    let negatives = dataset.join(NEGATIVES_DIR);
    if negatives.is_dir() {
        for file in image_files(&negatives)? {
            let Some(frame) = load_frame(&file) else {
                continue;
            };
            let result = classifier.classify(&frame);
            let score = result.scores.values().copied().fold(0.0f32, f32::max);
            negative_max = negative_max.max(score);
            rows.push(SampleScore {
                label: NEGATIVES_DIR.to_string(),
                file,
                misclassified: !result.state.is_unknown(),
                predicted: result.state,
                score,
                scores: result.scores,
            });
        }
    }

    if rows.is_empty() {
        return Err(CalibrationError::EmptyDataset(dataset.to_path_buf()));
    }

    let summaries = summarize(classifier, &rows, negative_max, margin);
    let suggested_threshold = suggest_threshold(&positives, negative_max, margin);

    Ok(CalibrationReport {
        states: classifier.state_names(),
        rows,
        summaries,
        negative_max,
        suggested_threshold,
    })
}

/// Threshold suggestion: sit above the strongest negative and below all but
/// the weakest 15% of positives, each by `margin`, clamped to a sane range.
pub fn suggest_threshold(positives: &[f32], negative_max: f32, margin: f32) -> f32 {
    let pos_floor = percentile(positives, 0.15) - margin;
    let neg_ceiling = negative_max + margin;
    pos_floor.max(neg_ceiling).clamp(0.5, 0.98)
}

/// Linear-interpolated percentile of an unsorted sample set. Empty input
/// yields 0.0, which the clamp in `suggest_threshold` absorbs.
fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn summarize(
    classifier: &TemplateClassifier,
    rows: &[SampleScore],
    negative_max: f32,
    margin: f32,
) -> Vec<StateSummary> {
    classifier
        .state_names()
        .into_iter()
        .filter_map(|state| {
            let scores: Vec<f32> = rows
                .iter()
                .filter(|r| r.label == state.as_str())
                .map(|r| r.score)
                .collect();
            if scores.is_empty() {
                return None;
            }
            let misclassified = rows
                .iter()
                .filter(|r| r.label == state.as_str() && r.misclassified)
                .count();
            Some(StateSummary {
                samples: scores.len(),
                min: scores.iter().copied().fold(f32::INFINITY, f32::min),
                p15: percentile(&scores, 0.15),
                max: scores.iter().copied().fold(0.0f32, f32::max),
                misclassified,
                suggested: suggest_threshold(&scores, negative_max, margin),
                state,
            })
        })
        .collect()
}

/// Write the per-sample rows as CSV for spreadsheet review.
pub fn write_csv(report: &CalibrationReport, path: &Path) -> Result<(), CalibrationError> {
    let write_err = |source| CalibrationError::WriteReport {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(write_err)?);
    let state_columns: Vec<String> = report
        .states
        .iter()
        .map(|s| format!("score_{s}"))
        .collect();
    writeln!(
        out,
        "label,file,predicted,score,misclassified,{}",
        state_columns.join(",")
    )
    .map_err(write_err)?;
    for row in &report.rows {
        write!(
            out,
            "{},{},{},{:.4},{}",
            row.label,
            row.file.display(),
            row.predicted,
            row.score,
            row.misclassified
        )
        .map_err(write_err)?;
        for state in &report.states {
            let s = row.scores.get(state).copied().unwrap_or(0.0);
            write!(out, ",{s:.4}").map_err(write_err)?;
        }
        writeln!(out).map_err(write_err)?;
    }
    Ok(())
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>, CalibrationError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CalibrationError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn load_frame(path: &Path) -> Option<image::RgbImage> {
    match image::open(path) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            log::warn!("skipping unreadable sample {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [0.9, 0.7, 0.8, 1.0, 0.6];
        assert!((percentile(&values, 0.0) - 0.6).abs() < 1e-6);
        assert!((percentile(&values, 1.0) - 1.0).abs() < 1e-6);
        assert!((percentile(&values, 0.5) - 0.8).abs() < 1e-6);
        // 15th percentile of 5 samples sits between the two lowest.
        let p15 = percentile(&values, 0.15);
        assert!(p15 > 0.6 && p15 < 0.7, "p15={p15}");
    }

    #[test]
    fn test_suggest_threshold_sits_between_populations() {
        // Strong positives, weak negatives: driven by the positive floor.
        let t = suggest_threshold(&[0.95, 0.96, 0.97, 0.98], 0.3, 0.05);
        assert!(t > 0.3 + 0.05);
        assert!(t < 0.95);

        // A hot negative pushes the threshold up instead.
        let t = suggest_threshold(&[0.95, 0.96], 0.92, 0.04);
        assert!((t - 0.96).abs() < 1e-6);
    }

    #[test]
    fn test_suggest_threshold_clamped() {
        assert!((suggest_threshold(&[0.2, 0.25], 0.1, 0.02) - 0.5).abs() < 1e-6);
        assert!((suggest_threshold(&[1.0, 1.0], 0.99, 0.05) - 0.98).abs() < 1e-6);
        // No data at all still lands inside the clamp range.
        let t = suggest_threshold(&[], 0.0, 0.05);
        assert!((0.5..=0.98).contains(&t));
    }

    #[test]
    fn test_image_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.PNG", "notes.txt", "c.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = image_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.PNG", "b.png", "c.jpg"]);
    }

    #[test]
    fn test_score_dataset_end_to_end() {
        use image::{ImageBuffer, Rgb};

        let root = tempfile::tempdir().unwrap();
        let screen: image::RgbImage = ImageBuffer::from_fn(400, 400, |x, y| {
            Rgb([
                ((x * 37 + y * 11) % 251) as u8,
                ((x * 13 + y * 29) % 241) as u8,
                ((x * 7 + y * 53) % 239) as u8,
            ])
        });

        let templates = root.path().join("templates");
        std::fs::create_dir(&templates).unwrap();
        image::imageops::crop_imm(&screen, 180, 180, 40, 40)
            .to_image()
            .save(templates.join("btn_list_start.png"))
            .unwrap();

        let dataset = root.path().join("dataset");
        std::fs::create_dir_all(dataset.join("list")).unwrap();
        std::fs::create_dir_all(dataset.join(NEGATIVES_DIR)).unwrap();
        screen.save(dataset.join("list/shot.png")).unwrap();
        let black: image::RgbImage = ImageBuffer::from_fn(400, 400, |_, _| Rgb([0, 0, 0]));
        black.save(dataset.join("negatives/blank.png")).unwrap();

        let cfg = crate::config::BotConfig::from_str(&format!(
            r#"{{
                screen: {{ width: 400, height: 400 }},
                coords: {{
                    list_start: [0.5, 0.5], pre_start: [0.5, 0.9],
                    support3: [0.8, 0.85], collect: [0.5, 0.88],
                }},
                detector: {{ use_edges: false, templates_dir: "{}" }},
            }}"#,
            templates.display()
        ))
        .unwrap();
        let classifier = TemplateClassifier::new(&cfg).unwrap();

        let report = score_dataset(&classifier, &dataset, 0.05).unwrap();
        assert_eq!(report.rows.len(), 2);
        assert!(report.rows.iter().all(|r| !r.misclassified));
        assert!((0.5..=0.98).contains(&report.suggested_threshold));

        let list = report
            .summaries
            .iter()
            .find(|s| s.state == "list")
            .unwrap();
        assert_eq!(list.samples, 1);
        assert!(list.max >= 0.85);
        assert!((0.5..=0.98).contains(&list.suggested));

        let csv = root.path().join("report.csv");
        write_csv(&report, &csv).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.contains("score_list"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = crate::config::BotConfig::from_str(
            r#"{
                screen: { width: 200, height: 200 },
                coords: {
                    list_start: [0.5, 0.5], pre_start: [0.5, 0.9],
                    support3: [0.8, 0.85], collect: [0.5, 0.88],
                },
            }"#,
        )
        .unwrap();
        let classifier = TemplateClassifier::new(&cfg).unwrap();
        let err = score_dataset(&classifier, dir.path(), 0.05).unwrap_err();
        assert!(matches!(err, CalibrationError::EmptyDataset(_)));
    }
}
