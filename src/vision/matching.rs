//! Masked template correlation
//!
//! The matcher runs normalized correlation (or squared difference) between a
//! cropped ROI and each of a state's templates. A binary mask excludes
//! pixels from every sum, so irrelevant background inside a template cannot
//! drag the score. Scores are always reported higher-is-better: the
//! distance-based methods are converted via `1 - value`.
//!
//! Edge preprocessing (grayscale, 3x3 Gaussian blur, Canny) is applied to
//! both ROI and template before correlation when a state asks for it. It
//! suppresses false matches against large flat-colored buttons; states whose
//! landmark is itself a flat icon disable it per-state.

use image::{GrayImage, RgbImage};
use serde::Serialize;

/// Correlation method. Mirrors the methods the detector was tuned with;
/// `CcorrNormed` is the production default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// Normalized cross-correlation, higher is better.
    CcorrNormed,
    /// Raw squared difference, lower is better (converted on report).
    Sqdiff,
    /// Normalized squared difference, lower is better (converted on report).
    SqdiffNormed,
    /// Mean-subtracted normalized correlation. Does not support masks.
    CcoeffNormed,
}

impl MatchMethod {
    /// Parse a config method name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ccorr_normed" => Some(Self::CcorrNormed),
            "sqdiff" => Some(Self::Sqdiff),
            "sqdiff_normed" => Some(Self::SqdiffNormed),
            "ccoeff_normed" => Some(Self::CcoeffNormed),
            _ => None,
        }
    }

    /// Whether a mask may weight this method's sums.
    pub fn supports_mask(self) -> bool {
        !matches!(self, Self::CcoeffNormed)
    }

    fn lower_is_better(self) -> bool {
        matches!(self, Self::Sqdiff | Self::SqdiffNormed)
    }
}

/// Best match of one template inside one ROI.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Template file name.
    pub template: String,
    /// Normalized score, higher is better.
    pub score: f32,
    /// Top-left corner of the match in full-image pixel coordinates.
    pub location: (u32, u32),
}

/// An image unpacked into f32 channel planes for correlation. Edge-processed
/// inputs carry one plane, color inputs three.
pub struct Planes {
    pub width: u32,
    pub height: u32,
    planes: Vec<Vec<f32>>,
}

impl Planes {
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let n = (width * height) as usize;
        let mut planes = vec![Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n)];
        for pixel in img.pixels() {
            for ch in 0..3 {
                planes[ch].push(pixel[ch] as f32);
            }
        }
        Self {
            width,
            height,
            planes,
        }
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        let plane = img.pixels().map(|p| p[0] as f32).collect();
        Self {
            width,
            height,
            planes: vec![plane],
        }
    }

    fn channels(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    fn at(&self, ch: usize, x: u32, y: u32) -> f32 {
        self.planes[ch][(y * self.width + x) as usize]
    }
}

const EPS: f64 = 1e-9;

/// Slide `template` over `image` and return the best (score, top-left)
/// position, with score already converted to higher-is-better.
///
/// Returns `None` when the template does not fit inside the image (callers
/// treat that as "no signal", not an error) or when the channel layouts
/// disagree. A mask is honored only for methods that support it; mask pixels
/// equal to zero are excluded from every sum.
pub fn best_match(
    image: &Planes,
    template: &Planes,
    mask: Option<&GrayImage>,
    method: MatchMethod,
) -> Option<(f32, (u32, u32))> {
    if template.width > image.width
        || template.height > image.height
        || template.width == 0
        || template.height == 0
        || template.channels() != image.channels()
    {
        return None;
    }

    let mask = mask.filter(|m| {
        method.supports_mask() && m.dimensions() == (template.width, template.height)
    });

    // Template-side sums are offset-independent.
    let channels = template.channels();
    let mut sum_t = 0.0f64;
    let mut sum_tt = 0.0f64;
    let mut samples = 0.0f64;
    for ty in 0..template.height {
        for tx in 0..template.width {
            if let Some(m) = mask {
                if m.get_pixel(tx, ty)[0] == 0 {
                    continue;
                }
            }
            for ch in 0..channels {
                let t = template.at(ch, tx, ty) as f64;
                sum_t += t;
                sum_tt += t * t;
                samples += 1.0;
            }
        }
    }
    if samples < 1.0 {
        // Fully masked-out template carries no signal.
        return None;
    }

    let mut best_value = if method.lower_is_better() {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    };
    let mut best_loc = (0u32, 0u32);

    for oy in 0..=(image.height - template.height) {
        for ox in 0..=(image.width - template.width) {
            let mut sum_i = 0.0f64;
            let mut sum_ii = 0.0f64;
            let mut sum_it = 0.0f64;
            for ty in 0..template.height {
                for tx in 0..template.width {
                    if let Some(m) = mask {
                        if m.get_pixel(tx, ty)[0] == 0 {
                            continue;
                        }
                    }
                    for ch in 0..channels {
                        let i = image.at(ch, ox + tx, oy + ty) as f64;
                        let t = template.at(ch, tx, ty) as f64;
                        sum_i += i;
                        sum_ii += i * i;
                        sum_it += i * t;
                    }
                }
            }

            let value = match method {
                MatchMethod::CcorrNormed => {
                    let den = (sum_ii * sum_tt).sqrt();
                    if den > EPS {
                        sum_it / den
                    } else {
                        0.0
                    }
                }
                MatchMethod::Sqdiff => sum_ii - 2.0 * sum_it + sum_tt,
                MatchMethod::SqdiffNormed => {
                    let num = sum_ii - 2.0 * sum_it + sum_tt;
                    let den = (sum_ii * sum_tt).sqrt();
                    if den > EPS {
                        num / den
                    } else if num.abs() <= EPS {
                        0.0
                    } else {
                        1.0
                    }
                }
                MatchMethod::CcoeffNormed => {
                    let mean_i = sum_i / samples;
                    let mean_t = sum_t / samples;
                    let cov = sum_it - samples * mean_i * mean_t;
                    let var_i = sum_ii - samples * mean_i * mean_i;
                    let var_t = sum_tt - samples * mean_t * mean_t;
                    let den = (var_i * var_t).sqrt();
                    if den > EPS {
                        cov / den
                    } else {
                        0.0
                    }
                }
            };

            let better = if method.lower_is_better() {
                value < best_value
            } else {
                value > best_value
            };
            if better {
                best_value = value;
                best_loc = (ox, oy);
            }
        }
    }

    let score = if method.lower_is_better() {
        1.0 - best_value
    } else {
        best_value
    };
    Some((score as f32, best_loc))
}

/// Edge-preprocess a color image: grayscale, 3x3 Gaussian blur, Canny.
/// Thresholds come from config (`canny_low` / `canny_high`); the defaults
/// 60/120 were calibrated on device screenshots.
pub fn edge_map(rgb: &RgbImage, low: f32, high: f32) -> GrayImage {
    let gray = image::imageops::grayscale(rgb);
    let blurred = imageproc::filter::gaussian_blur_f32(&gray, 0.8);
    imageproc::edges::canny(&blurred, low, high)
}
