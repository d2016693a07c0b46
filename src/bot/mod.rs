//! Support-farming bot loop
//!
//! Drives the game through one fixed cycle: launch, stage list, prebattle,
//! combat with support calls, settlement collection, back to the list. Every
//! transition is observed through the template classifier rather than timed
//! blindly; a tap whose transition never shows up is retried once before the
//! cycle aborts.

pub mod session;

use std::time::{Duration, Instant};

use image::RgbImage;

use crate::android::{jittered_tap, AdbClient, AdbError};
use crate::config::BotConfig;
use crate::vision::{ClassificationResult, TemplateClassifier};

pub use session::SessionLog;

/// Support slots tapped during combat, in order. Slots missing from
/// `coords` are skipped.
const SUPPORT_SLOTS: [&str; 6] = [
    "support1", "support2", "support3", "support4", "support5", "support6",
];

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Adb(#[from] AdbError),
    #[error("no tap point named '{0}' in config")]
    MissingCoord(String),
    #[error("timed out after {secs:.0}s waiting for state '{target}' (last seen: {last})")]
    Timeout {
        target: String,
        secs: f32,
        last: String,
    },
    #[error("session setup failed: {0}")]
    Session(#[from] std::io::Error),
}

/// One bot instance: device handle, classifier, config and session log.
pub struct SupportBot {
    adb: AdbClient,
    classifier: TemplateClassifier,
    cfg: BotConfig,
    session: SessionLog,
}

impl SupportBot {
    pub fn new(
        adb: AdbClient,
        classifier: TemplateClassifier,
        cfg: BotConfig,
        session: SessionLog,
    ) -> Self {
        Self {
            adb,
            classifier,
            cfg,
            session,
        }
    }

    pub fn session(&self) -> &SessionLog {
        &self.session
    }

    fn capture(&self) -> Result<RgbImage, BotError> {
        let frame = self.adb.screenshot()?;
        let expected = (self.cfg.screen.width, self.cfg.screen.height);
        if frame.dimensions() != expected {
            log::warn!(
                "frame is {:?} but config is calibrated for {:?}",
                frame.dimensions(),
                expected
            );
        }
        Ok(frame)
    }

    /// Tap a named point from `coords`, with the configured jitter.
    pub fn click_pct(&self, name: &str) -> Result<(), BotError> {
        let point = self
            .cfg
            .coords
            .get(name)
            .ok_or_else(|| BotError::MissingCoord(name.to_string()))?;
        let (x, y) = jittered_tap(
            *point,
            self.cfg.timing.tap_jitter_pct,
            (self.cfg.screen.width, self.cfg.screen.height),
        );
        self.session.log(&format!("tap {name} -> ({x}, {y})"));
        self.adb.tap(x, y)?;
        Ok(())
    }

    /// Poll until the classifier reports `target` or the timeout expires.
    pub fn wait_for_state(
        &self,
        target: &str,
        timeout: Duration,
    ) -> Result<ClassificationResult, BotError> {
        let poll = Duration::from_secs_f32(self.cfg.timing.poll_secs.max(0.1));
        let deadline = Instant::now() + timeout;

        loop {
            let frame = self.capture()?;
            let last = self.classifier.classify(&frame);
            log::debug!("waiting for '{target}': saw '{}' ({:.3})", last.state, last.score);
            if last.state == target {
                self.session
                    .log(&format!("reached {target} (score {:.3})", last.score));
                if let Some(location) = last.location {
                    self.session.save_overlay(
                        &format!("{target}_{}.png", chrono::Local::now().format("%H%M%S")),
                        &frame,
                        location,
                    );
                }
                return Ok(last);
            }
            if Instant::now() >= deadline {
                self.session.log(&format!(
                    "timeout waiting for {target}, last saw {} ({:.3})",
                    last.state, last.score
                ));
                return Err(BotError::Timeout {
                    target: target.to_string(),
                    secs: timeout.as_secs_f32(),
                    last: last.state.to_string(),
                });
            }
            std::thread::sleep(poll);
        }
    }

    /// Tap a point and wait for its transition, retrying the tap once if
    /// the target state never shows up. Dropped taps are the most common
    /// transient on loaded emulators.
    fn tap_and_wait(&self, point: &str, target: &str) -> Result<(), BotError> {
        let timeout = Duration::from_secs_f32(self.cfg.timing.transition_timeout_secs);
        self.click_pct(point)?;
        match self.wait_for_state(target, timeout) {
            Ok(_) => Ok(()),
            Err(BotError::Timeout { .. }) => {
                self.session.log(&format!("retrying tap {point} for {target}"));
                self.click_pct(point)?;
                self.wait_for_state(target, timeout).map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Launch the game and wait for the stage list.
    pub fn launch_game(&self) -> Result<(), BotError> {
        self.session.log(&format!("launching {}", self.cfg.package));
        self.adb.launch_app(&self.cfg.package)?;
        // App cold start can take far longer than a screen transition.
        self.wait_for_state("list", Duration::from_secs_f32(
            self.cfg.timing.settlement_timeout_secs,
        ))?;
        Ok(())
    }

    /// From the stage list into the prebattle screen.
    pub fn goto_prebattle(&self) -> Result<(), BotError> {
        self.tap_and_wait("list_start", "prebattle")
    }

    /// From prebattle into combat.
    pub fn start_combat(&self) -> Result<(), BotError> {
        self.tap_and_wait("pre_start", "combat")
    }

    /// During combat, tap every configured support slot once, then wait for
    /// the settlement screen. The drone fights on its own; supports are the
    /// only input this bot gives.
    pub fn combat_support_only(&self) -> Result<(), BotError> {
        for slot in SUPPORT_SLOTS {
            if self.cfg.coords.contains_key(slot) {
                self.click_pct(slot)?;
                std::thread::sleep(Duration::from_millis(400));
            }
        }
        self.wait_for_state(
            "settlement",
            Duration::from_secs_f32(self.cfg.timing.settlement_timeout_secs),
        )?;
        Ok(())
    }

    /// Collect settlement rewards and return to the stage list.
    pub fn collect_and_back(&self) -> Result<(), BotError> {
        self.tap_and_wait("collect", "list")
    }

    /// One full farm cycle, starting from the stage list.
    pub fn run_one_cycle(&self) -> Result<(), BotError> {
        self.session.log("cycle start");
        self.goto_prebattle()?;
        self.start_combat()?;
        self.combat_support_only()?;
        self.collect_and_back()?;
        self.session.log("cycle complete");
        Ok(())
    }

    /// Run cycles until the duration elapses; `None` runs until an error.
    /// A single failed cycle relaunches the game and continues.
    pub fn run(&self, duration: Option<Duration>) -> Result<u32, BotError> {
        let deadline = duration.map(|d| Instant::now() + d);
        self.launch_game()?;

        let mut completed = 0u32;
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.session.log(&format!("time up after {completed} cycle(s)"));
                return Ok(completed);
            }
            match self.run_one_cycle() {
                Ok(()) => completed += 1,
                Err(BotError::Timeout { target, last, .. }) => {
                    log::warn!("cycle stuck waiting for '{target}' (saw '{last}'), relaunching");
                    self.session.log("cycle aborted, relaunching game");
                    self.launch_game()?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
