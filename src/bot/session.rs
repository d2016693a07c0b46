//! Session recording
//!
//! Every bot run gets its own directory under `runs/`, named by wall-clock
//! start time, holding a plain-text `run.log` and any frames saved for
//! later inspection. Overlay frames mark the winning match location so a
//! misfire can be diagnosed from disk alone.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const MARKER: Rgb<u8> = Rgb([255, 0, 0]);

/// Append-only log plus frame dumps for one bot run.
pub struct SessionLog {
    dir: PathBuf,
    log: Mutex<File>,
}

impl SessionLog {
    /// Create `runs/session_<stamp>/` under `root` and open its log file.
    pub fn create(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dir = root.as_ref().join(format!("session_{stamp}"));
        std::fs::create_dir_all(&dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("run.log"))?;
        Ok(Self {
            dir,
            log: Mutex::new(log),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one timestamped line. Logging failures are downgraded to a
    /// warning so a full disk cannot stop the bot mid-cycle.
    pub fn log(&self, message: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let mut file = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "[{stamp}] {message}") {
            log::warn!("session log write failed: {e}");
        }
    }

    /// Save a frame under this session's directory.
    pub fn save_frame(&self, name: &str, frame: &RgbImage) {
        let path = self.dir.join(name);
        if let Err(e) = frame.save(&path) {
            log::warn!("failed to save frame {}: {e}", path.display());
        }
    }

    /// Save a frame with a marker box at the winning match location.
    pub fn save_overlay(&self, name: &str, frame: &RgbImage, location: (u32, u32)) {
        let mut annotated = frame.clone();
        let (x, y) = (location.0 as i32, location.1 as i32);
        draw_hollow_rect_mut(&mut annotated, Rect::at(x - 2, y - 2).of_size(64, 64), MARKER);
        self.save_frame(name, &annotated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    #[test]
    fn test_session_creates_directory_and_log() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionLog::create(root.path()).unwrap();
        assert!(session.dir().starts_with(root.path()));
        assert!(session
            .dir()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("session_"));

        session.log("cycle start");
        session.log("state=list score=0.97");
        let text = std::fs::read_to_string(session.dir().join("run.log")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("cycle start"));
        assert!(text.lines().all(|l| l.starts_with('[')));
    }

    #[test]
    fn test_overlay_marks_location() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionLog::create(root.path()).unwrap();
        let frame: RgbImage = ImageBuffer::from_fn(200, 200, |_, _| Rgb([0, 0, 0]));
        session.save_overlay("hit.png", &frame, (80, 80));

        let saved = image::open(session.dir().join("hit.png")).unwrap().to_rgb8();
        assert_eq!(*saved.get_pixel(78, 78), MARKER);
        // Source frame stays untouched.
        assert_eq!(*frame.get_pixel(78, 78), Rgb([0, 0, 0]));
    }
}
