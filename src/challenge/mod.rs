//! Interstitial challenge detection and clearing.
//!
//! Marketplaces occasionally interpose a verification page between the
//! listing and the product content. [`ChallengeResolver`] owns detection
//! (marker selectors) and delegates the actual solving to a pluggable
//! [`ChallengeSolver`]; the shipped solver works the audio variant of
//! the checkbox widget with an external transcription service.

mod transcribe;

pub use transcribe::{HttpTranscriber, Transcriber};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::Driver;

const ANCHOR_CHECKBOX: &str = "#recaptcha-anchor";
const AUDIO_BUTTON: &str = "#recaptcha-audio-button";
const AUDIO_SOURCE: &str = "#audio-source";
const AUDIO_RESPONSE: &str = "#audio-response";
const VERIFY_BUTTON: &str = "#recaptcha-verify-button";

/// What happened when the resolver was asked to clear the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// A challenge was present and is now gone.
    Cleared,
    /// No challenge markers on the page; nothing to do.
    NotPresent,
    /// A challenge was present and could not be cleared.
    Failed(String),
}

/// Strategy for clearing a detected challenge.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Attempt one solve pass. `Ok(true)` means the solver believes it
    /// completed the widget; the resolver still re-checks the markers.
    async fn solve(&self, driver: &mut dyn Driver) -> Result<bool>;
}

/// Detects challenge pages and drives a solver against them.
pub struct ChallengeResolver {
    markers: Vec<String>,
    submit_selector: String,
    detect_timeout: Duration,
    settle_delay: Duration,
    solver: Box<dyn ChallengeSolver>,
}

impl ChallengeResolver {
    pub fn new(markers: Vec<String>, solver: Box<dyn ChallengeSolver>) -> Self {
        Self {
            markers,
            submit_selector: crate::site::CHALLENGE_SUBMIT_SELECTOR.to_string(),
            detect_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_secs(2),
            solver,
        }
    }

    /// Override detection and settle timings (tests use near-zero values).
    pub fn with_timings(mut self, detect_timeout: Duration, settle_delay: Duration) -> Self {
        self.detect_timeout = detect_timeout;
        self.settle_delay = settle_delay;
        self
    }

    /// Override the page-level submit control selector.
    pub fn with_submit_selector(mut self, selector: impl Into<String>) -> Self {
        self.submit_selector = selector.into();
        self
    }

    /// True when any challenge marker is visible on the current page.
    pub async fn is_present(&self, driver: &mut dyn Driver) -> bool {
        for marker in &self.markers {
            if driver.exists(marker, self.detect_timeout).await {
                debug!("Challenge marker present: {}", marker);
                return true;
            }
        }
        false
    }

    /// Detect and, if needed, clear the challenge on the current page.
    pub async fn attempt_clear(&self, driver: &mut dyn Driver) -> ChallengeOutcome {
        if !self.is_present(driver).await {
            return ChallengeOutcome::NotPresent;
        }

        info!("Challenge page detected, attempting to clear it");
        // The solver's own failures are swallowed; the re-check and the
        // submit step below decide whether the page actually unblocked.
        match self.solver.solve(driver).await {
            Ok(true) => {}
            Ok(false) => debug!("Solver gave up on the widget"),
            Err(e) => warn!("Challenge solve failed: {:#}", e),
        }
        tokio::time::sleep(self.settle_delay).await;

        if self.is_present(driver).await {
            warn!("Challenge markers are still present after the solve pass");
            return ChallengeOutcome::Failed("challenge markers persist after solve".to_string());
        }

        // The widget is gone; the blocked action only starts once the
        // page-level submit control is clicked.
        if !driver.exists(&self.submit_selector, self.detect_timeout).await {
            warn!("No submit control after clearing the challenge");
            return ChallengeOutcome::Failed("submit control not found".to_string());
        }
        match driver.click(&self.submit_selector).await {
            Ok(()) => {
                info!("Challenge cleared, submit clicked");
                ChallengeOutcome::Cleared
            }
            Err(e) => {
                warn!("Submit click failed: {}", e);
                ChallengeOutcome::Failed(format!("submit click failed: {}", e))
            }
        }
    }
}

/// Fallback solver for unattended runs without a transcription endpoint.
/// Reports the challenge unsolved so callers back off instead of looping.
pub struct NoopSolver;

#[async_trait]
impl ChallengeSolver for NoopSolver {
    async fn solve(&self, _driver: &mut dyn Driver) -> Result<bool> {
        Ok(false)
    }
}

/// Solves the audio variant: request the audio clip, transcribe it, type
/// the transcript back, and verify.
pub struct AudioChallengeSolver {
    transcriber: Box<dyn Transcriber>,
    work_dir: PathBuf,
    element_timeout: Duration,
    step_delay: Duration,
}

impl AudioChallengeSolver {
    pub fn new(transcriber: Box<dyn Transcriber>, work_dir: PathBuf) -> Self {
        Self {
            transcriber,
            work_dir,
            element_timeout: Duration::from_secs(8),
            step_delay: Duration::from_secs(1),
        }
    }

    /// Shrink the in-widget waits (tests use near-zero values).
    pub fn with_timings(mut self, element_timeout: Duration, step_delay: Duration) -> Self {
        self.element_timeout = element_timeout;
        self.step_delay = step_delay;
        self
    }

    async fn checkbox_is_checked(&self, driver: &mut dyn Driver) -> bool {
        matches!(
            driver.read_attribute(ANCHOR_CHECKBOX, "aria-checked").await,
            Ok(Some(ref v)) if v == "true"
        )
    }
}

#[async_trait]
impl ChallengeSolver for AudioChallengeSolver {
    async fn solve(&self, driver: &mut dyn Driver) -> Result<bool> {
        // The plain checkbox click sometimes suffices.
        if driver.exists(ANCHOR_CHECKBOX, self.element_timeout).await {
            driver
                .click(ANCHOR_CHECKBOX)
                .await
                .context("Failed to click the challenge checkbox")?;
            tokio::time::sleep(self.step_delay).await;
            if self.checkbox_is_checked(driver).await {
                debug!("Checkbox click alone cleared the widget");
                return Ok(true);
            }
        }

        if !driver.exists(AUDIO_BUTTON, self.element_timeout).await {
            debug!("No audio button; cannot solve this challenge variant");
            return Ok(false);
        }
        driver
            .click(AUDIO_BUTTON)
            .await
            .context("Failed to switch to the audio challenge")?;
        tokio::time::sleep(self.step_delay).await;

        let audio_url = driver
            .read_attribute(AUDIO_SOURCE, "src")
            .await
            .context("Audio source element missing")?
            .ok_or_else(|| anyhow::anyhow!("Audio source has no src attribute"))?;

        let clip_path = self.work_dir.join("challenge_audio.mp3");
        driver
            .save_resource(&audio_url, &clip_path)
            .await
            .context("Failed to download the challenge audio clip")?;
        let audio = tokio::fs::read(&clip_path)
            .await
            .with_context(|| format!("Failed to read {}", clip_path.display()))?;
        let _ = tokio::fs::remove_file(&clip_path).await;

        let transcript = self
            .transcriber
            .transcribe(&audio)
            .await
            .context("Transcription failed")?;
        info!("Challenge audio transcribed ({} chars)", transcript.len());

        driver
            .type_text(AUDIO_RESPONSE, &transcript)
            .await
            .context("Failed to type the transcript")?;
        tokio::time::sleep(self.step_delay).await;
        driver
            .click(VERIFY_BUTTON)
            .await
            .context("Failed to submit the transcript")?;
        tokio::time::sleep(self.step_delay).await;

        Ok(true)
    }
}
