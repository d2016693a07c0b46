//! Synthetic tap placement
//!
//! Taps land at a configured normalized point plus a small uniform jitter so
//! repeated cycles do not hit the exact same pixel every time. The jittered
//! point is clamped back into the screen before conversion to pixels.

use rand::Rng;

/// Resolve a normalized tap point to jittered pixel coordinates.
///
/// `jitter_pct` is the maximum offset on each axis as a fraction of that
/// axis; the default is small enough to stay inside any tappable button.
pub fn jittered_tap(point: [f32; 2], jitter_pct: f32, screen: (u32, u32)) -> (u32, u32) {
    let mut rng = rand::thread_rng();
    let jx = if jitter_pct > 0.0 {
        rng.gen_range(-jitter_pct..=jitter_pct)
    } else {
        0.0
    };
    let jy = if jitter_pct > 0.0 {
        rng.gen_range(-jitter_pct..=jitter_pct)
    } else {
        0.0
    };

    let nx = (point[0] + jx).clamp(0.0, 1.0);
    let ny = (point[1] + jy).clamp(0.0, 1.0);

    let x = (nx * screen.0 as f32).round() as u32;
    let y = (ny * screen.1 as f32).round() as u32;
    (x.min(screen.0 - 1), y.min(screen.1 - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_near_target_and_in_bounds() {
        let screen = (1080, 1920);
        for _ in 0..200 {
            let (x, y) = jittered_tap([0.5, 0.82], 0.008, screen);
            assert!(x < screen.0 && y < screen.1);
            assert!((x as f32 - 540.0).abs() <= 0.008 * 1080.0 + 1.0);
            assert!((y as f32 - 1574.4).abs() <= 0.008 * 1920.0 + 1.0);
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        assert_eq!(jittered_tap([0.5, 0.5], 0.0, (1000, 1000)), (500, 500));
    }

    #[test]
    fn test_corner_taps_clamp_inside_screen() {
        for _ in 0..100 {
            let (x, y) = jittered_tap([1.0, 1.0], 0.02, (1080, 1920));
            assert!(x <= 1079 && y <= 1919);
            let (x, y) = jittered_tap([0.0, 0.0], 0.02, (1080, 1920));
            assert!(x < 1080 && y < 1920);
        }
    }
}
