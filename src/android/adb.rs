//! Thin adb wrapper
//!
//! Screenshots come over `adb exec-out screencap -p`, which streams the PNG
//! straight to stdout without touching device storage. Taps and app launch
//! go through `input` and `monkey`. Every call shells out to the `adb`
//! binary (PATH by default, overridable); there is no persistent connection
//! to manage.

use std::process::Command;

use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("failed to run adb: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("adb {command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("screencap produced an unreadable image: {0}")]
    BadScreenshot(#[from] image::ImageError),
}

/// Handle to one device. With no serial, adb picks the only connected
/// device and errors out when there are several.
#[derive(Debug, Clone)]
pub struct AdbClient {
    binary: std::path::PathBuf,
    serial: Option<String>,
}

impl AdbClient {
    /// Client using the `adb` binary on PATH.
    pub fn new(serial: Option<String>) -> Self {
        Self {
            binary: "adb".into(),
            serial,
        }
    }

    /// Use an explicit adb binary instead of resolving through PATH.
    pub fn with_binary(mut self, binary: impl Into<std::path::PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>, AdbError> {
        let output = self.command().args(args).output()?;
        if !output.status.success() {
            return Err(AdbError::Failed {
                command: args.join(" "),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Capture the current screen as an RGB frame.
    pub fn screenshot(&self) -> Result<RgbImage, AdbError> {
        let png = self.run(&["exec-out", "screencap", "-p"])?;
        Ok(image::load_from_memory(&png)?.to_rgb8())
    }

    /// Tap at absolute pixel coordinates.
    pub fn tap(&self, x: u32, y: u32) -> Result<(), AdbError> {
        log::debug!("tap ({x}, {y})");
        self.run(&["shell", "input", "tap", &x.to_string(), &y.to_string()])?;
        Ok(())
    }

    /// Swipe between two pixel points over `duration_ms`.
    pub fn swipe(
        &self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u32,
    ) -> Result<(), AdbError> {
        log::debug!("swipe {from:?} -> {to:?} over {duration_ms}ms");
        self.run(&[
            "shell",
            "input",
            "swipe",
            &from.0.to_string(),
            &from.1.to_string(),
            &to.0.to_string(),
            &to.1.to_string(),
            &duration_ms.to_string(),
        ])?;
        Ok(())
    }

    /// Bring the given package to the foreground, launching it if needed.
    pub fn launch_app(&self, package: &str) -> Result<(), AdbError> {
        log::info!("launching {package}");
        self.run(&[
            "shell",
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])?;
        Ok(())
    }

    /// Send the system back key.
    pub fn key_back(&self) -> Result<(), AdbError> {
        self.run(&["shell", "input", "keyevent", "KEYCODE_BACK"])?;
        Ok(())
    }
}
