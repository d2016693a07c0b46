//! Screen geometry and region-of-interest handling
//!
//! All configuration coordinates are normalized fractions of the screen
//! (`[0, 1]` on both axes) so one config works across device resolutions.
//! This module resolves them to pixel coordinates and provides the single
//! ROI abstraction used by both the template and OCR scoring paths.

/// Convert a normalized point to pixel coordinates for the given screen size.
pub fn pixel_from_normalized(p: [f32; 2], width: u32, height: u32) -> (i64, i64) {
    (
        (p[0] * width as f32).round() as i64,
        (p[1] * height as f32).round() as i64,
    )
}

/// Convert pixel coordinates back to normalized fractions.
pub fn normalized_from_pixel(x: i64, y: i64, width: u32, height: u32) -> [f32; 2] {
    [x as f32 / width as f32, y as f32 / height as f32]
}

/// A rectangular sub-area of a screenshot, in pixels, already clipped to the
/// image bounds. May be empty when the source ROI fell off the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// True when clipping reduced this rectangle to zero area.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A region of interest expressed as center + size fractions of the screen.
///
/// Both classifier variants address ROIs through this one type: the OCR
/// config stores `[cx, cy, w, h]` fractions directly, while template states
/// build the same thing from an anchor point plus a pixel half-size via
/// [`Roi::from_anchor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Roi {
    /// Build from the `[cx, cy, w, h]` fraction array used in config files.
    pub fn from_fractions(rel: [f32; 4]) -> Self {
        Self {
            cx: rel[0],
            cy: rel[1],
            w: rel[2],
            h: rel[3],
        }
    }

    /// Build from an anchor point plus a pixel half-size and a normalized
    /// offset added to the anchor. This is the template-state convention.
    pub fn from_anchor(
        anchor: [f32; 2],
        half_size: (u32, u32),
        offset_pct: (f32, f32),
        screen: (u32, u32),
    ) -> Self {
        let (sw, sh) = (screen.0 as f32, screen.1 as f32);
        Self {
            cx: anchor[0] + offset_pct.0,
            cy: anchor[1] + offset_pct.1,
            w: (half_size.0 * 2) as f32 / sw,
            h: (half_size.1 * 2) as f32 / sh,
        }
    }

    /// Resolve to a pixel rectangle, clipping each edge independently to
    /// `[0, width) x [0, height)`. Never errors: an ROI pushed fully off the
    /// screen resolves to an empty rect and downstream matching yields no
    /// results for it.
    pub fn to_rect(&self, width: u32, height: u32) -> Rect {
        let (w, h) = (width as i64, height as i64);
        let cx = (self.cx * width as f32) as i64;
        let cy = (self.cy * height as f32) as i64;
        let half_w = (self.w * width as f32 / 2.0) as i64;
        let half_h = (self.h * height as f32 / 2.0) as i64;

        let x1 = (cx - half_w).clamp(0, w);
        let y1 = (cy - half_h).clamp(0, h);
        let x2 = (cx + half_w).clamp(0, w);
        let y2 = (cy + half_h).clamp(0, h);

        Rect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_round_trip() {
        let (width, height) = (1080u32, 1920u32);
        for &(x, y) in &[(0i64, 0i64), (540, 960), (1079, 1919), (13, 1700)] {
            let norm = normalized_from_pixel(x, y, width, height);
            let (rx, ry) = pixel_from_normalized(norm, width, height);
            assert!((rx - x).abs() <= 1, "x: {x} -> {rx}");
            assert!((ry - y).abs() <= 1, "y: {y} -> {ry}");
        }
    }

    #[test]
    fn test_roi_clips_at_origin() {
        let roi = Roi::from_anchor([0.0, 0.0], (100, 80), (0.0, 0.0), (1080, 1920));
        let rect = roi.to_rect(1080, 1920);
        assert_eq!((rect.x, rect.y), (0, 0));
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 80);
    }

    #[test]
    fn test_roi_clips_at_far_edge() {
        let roi = Roi::from_fractions([1.0, 1.0, 0.2, 0.2]);
        let rect = roi.to_rect(1000, 1000);
        assert_eq!(rect.x, 900);
        assert_eq!(rect.y, 900);
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 100);
    }

    #[test]
    fn test_roi_degenerates_off_screen() {
        let roi = Roi::from_fractions([1.5, 0.5, 0.1, 0.1]);
        let rect = roi.to_rect(1000, 1000);
        assert!(rect.is_empty());
    }

    #[test]
    fn test_anchor_offset_moves_center() {
        let base = Roi::from_anchor([0.5, 0.5], (50, 50), (0.0, 0.0), (1000, 1000));
        let shifted = Roi::from_anchor([0.5, 0.5], (50, 50), (0.1, -0.1), (1000, 1000));
        let b = base.to_rect(1000, 1000);
        let s = shifted.to_rect(1000, 1000);
        assert_eq!(s.x, b.x + 100);
        assert_eq!(s.y + 100, b.y);
        assert_eq!(s.width, b.width);
    }
}
