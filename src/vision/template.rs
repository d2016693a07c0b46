//! Template and mask loading
//!
//! A template is a small color patch of a UI landmark. Its optional binary
//! mask marks which pixels participate in correlation: white = compare,
//! black = ignore. The mask comes from a `*_mask.png` sidecar when present,
//! otherwise from the template's own alpha channel.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Luma, RgbImage};

/// Errors while reading a template from disk. Non-fatal for classification:
/// callers skip the template and keep the state's remaining ones.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to load template {path}: {source}")]
    Load {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("mask {path} is {mask_w}x{mask_h} but template is {tmpl_w}x{tmpl_h}")]
    MaskSize {
        path: PathBuf,
        mask_w: u32,
        mask_h: u32,
        tmpl_w: u32,
        tmpl_h: u32,
    },
}

/// A loaded landmark template, immutable after construction.
#[derive(Debug, Clone)]
pub struct Template {
    /// File name without directory, used in diagnostics and results.
    pub name: String,
    pub path: PathBuf,
    pub image: RgbImage,
    pub mask: Option<GrayImage>,
}

impl Template {
    /// Load a template and its mask.
    ///
    /// Mask resolution order: `<stem>_mask.png` sidecar first, then the
    /// template's alpha channel. Either source is binarized at load time:
    /// any value > 0 becomes 255 (compare), 0 stays 0 (ignore).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|source| TemplateError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let mut mask = match sidecar_mask_path(path) {
            Some(mask_path) if mask_path.exists() => {
                let m = image::open(&mask_path).map_err(|source| TemplateError::Load {
                    path: mask_path.clone(),
                    source,
                })?;
                Some((binarize(&m.to_luma8()), mask_path))
            }
            _ => None,
        };

        let rgb = match &decoded {
            DynamicImage::ImageRgba8(rgba) => {
                if mask.is_none() {
                    let alpha = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
                        Luma([rgba.get_pixel(x, y)[3]])
                    });
                    mask = Some((binarize(&alpha), path.to_path_buf()));
                }
                decoded.to_rgb8()
            }
            _ => decoded.to_rgb8(),
        };

        let mask = match mask {
            Some((m, mask_path)) => {
                if m.dimensions() != rgb.dimensions() {
                    return Err(TemplateError::MaskSize {
                        path: mask_path,
                        mask_w: m.width(),
                        mask_h: m.height(),
                        tmpl_w: rgb.width(),
                        tmpl_h: rgb.height(),
                    });
                }
                Some(m)
            }
            None => None,
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            path: path.to_path_buf(),
            image: rgb,
            mask,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// `templates/foo.png` -> `templates/foo_mask.png`.
fn sidecar_mask_path(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy();
    Some(path.with_file_name(format!("{stem}_mask.png")))
}

fn binarize(gray: &GrayImage) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > 0 { 255 } else { 0 }])
    })
}
