//! Bounded-retry artifact download state machine.
//!
//! The marketplace never signals download completion, so the machine
//! snapshots the target directory before triggering the download and
//! then polls for a new archive to appear. When a pass comes up empty
//! it checks for an interstitial challenge before burning a retry.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::browser::{Driver, DriverError};
use crate::challenge::{ChallengeOutcome, ChallengeResolver};

/// Result of one full `acquire_artifact` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A new archive appeared; the path points at it.
    Success(PathBuf),
    /// No download control matched any selector strategy.
    NoButtonFound,
    /// A challenge blocked the download and could not be cleared.
    ChallengePresented,
    /// The download control was found but clicking it failed.
    ClickFailed,
    /// The click landed but no archive appeared within the poll budget.
    Timeout,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success(_))
    }
}

/// Tuning for the download machine. All fields have serde defaults so a
/// config file only needs to mention what it changes.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Outer attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ceiling on the click/trigger action itself.
    #[serde(default = "default_trigger_timeout_secs")]
    pub trigger_timeout_secs: u64,
    /// Directory polls per attempt.
    #[serde(default = "default_poll_iterations")]
    pub poll_iterations: u32,
    /// Gap between directory polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for a selector before trying the next strategy.
    #[serde(default = "default_find_timeout_secs")]
    pub find_timeout_secs: u64,
    /// Extension that marks the artifact we are after.
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    /// Ordered selector strategies for the download control.
    #[serde(default = "default_button_selectors")]
    pub button_selectors: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_trigger_timeout_secs() -> u64 {
    60
}

fn default_poll_iterations() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_find_timeout_secs() -> u64 {
    8
}

fn default_archive_extension() -> String {
    "zip".to_string()
}

fn default_button_selectors() -> Vec<String> {
    crate::site::DOWNLOAD_BUTTON_SELECTORS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            trigger_timeout_secs: default_trigger_timeout_secs(),
            poll_iterations: default_poll_iterations(),
            poll_interval_ms: default_poll_interval_ms(),
            find_timeout_secs: default_find_timeout_secs(),
            archive_extension: default_archive_extension(),
            button_selectors: default_button_selectors(),
        }
    }
}

impl DownloadConfig {
    fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn find_timeout(&self) -> Duration {
        Duration::from_secs(self.find_timeout_secs)
    }
}

/// Drives locate, snapshot, trigger, poll, and the blocked detour.
pub struct DownloadAttemptMachine {
    config: DownloadConfig,
}

impl DownloadAttemptMachine {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    /// Try to pull the archive for the current item page into `target_dir`.
    ///
    /// The directory must already exist. Image and PDF side artifacts are
    /// not this machine's concern; a miss here does not invalidate them.
    pub async fn acquire_artifact(
        &self,
        driver: &mut dyn Driver,
        resolver: &ChallengeResolver,
        target_dir: &Path,
    ) -> DownloadOutcome {
        let mut last_reason = DownloadOutcome::NoButtonFound;

        for attempt in 1..=self.config.max_retries {
            debug!(
                "Download attempt {}/{} in {}",
                attempt,
                self.config.max_retries,
                target_dir.display()
            );

            // Locate
            let selector = match self.locate(driver).await {
                Some(sel) => sel,
                None => {
                    warn!("No download control matched on attempt {}", attempt);
                    last_reason = DownloadOutcome::NoButtonFound;
                    match self.blocked(driver, resolver, None, target_dir).await {
                        BlockedVerdict::Recovered(path) => {
                            return DownloadOutcome::Success(path)
                        }
                        BlockedVerdict::PollExhausted => return DownloadOutcome::Timeout,
                        BlockedVerdict::ChallengeStuck => {
                            last_reason = DownloadOutcome::ChallengePresented;
                            continue;
                        }
                        BlockedVerdict::NoChallenge => continue,
                    }
                }
            };

            // Snapshot before triggering so a delayed write is still "new".
            let before = snapshot(target_dir);

            // Trigger
            match driver
                .click_for_download(&selector, target_dir, self.config.trigger_timeout())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Download click on {} did not start anything", selector);
                    last_reason = DownloadOutcome::ClickFailed;
                    match self
                        .blocked(driver, resolver, Some(&before), target_dir)
                        .await
                    {
                        BlockedVerdict::Recovered(path) => {
                            return DownloadOutcome::Success(path)
                        }
                        BlockedVerdict::PollExhausted => return DownloadOutcome::Timeout,
                        BlockedVerdict::ChallengeStuck => {
                            last_reason = DownloadOutcome::ChallengePresented;
                            continue;
                        }
                        BlockedVerdict::NoChallenge => continue,
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Transient fault on trigger: {}", e);
                    if let Some(path) = self.direct_fetch(driver, &selector, target_dir).await {
                        return DownloadOutcome::Success(path);
                    }
                    let _ = driver.refresh().await;
                    last_reason = DownloadOutcome::ClickFailed;
                    continue;
                }
                Err(DriverError::NotFound(_)) => {
                    last_reason = DownloadOutcome::NoButtonFound;
                    let _ = driver.refresh().await;
                    continue;
                }
                Err(e) => {
                    warn!("Download trigger failed: {}", e);
                    if let Some(path) = self.direct_fetch(driver, &selector, target_dir).await {
                        return DownloadOutcome::Success(path);
                    }
                    last_reason = DownloadOutcome::ClickFailed;
                    let _ = driver.refresh().await;
                    continue;
                }
            }

            // Poll
            if let Some(path) = self.poll(target_dir, &before).await {
                info!("Archive arrived: {}", path.display());
                return DownloadOutcome::Success(path);
            }

            warn!("Poll budget exhausted without a new archive (attempt {})", attempt);
            last_reason = DownloadOutcome::Timeout;
            match self
                .blocked(driver, resolver, Some(&before), target_dir)
                .await
            {
                BlockedVerdict::Recovered(path) => return DownloadOutcome::Success(path),
                BlockedVerdict::PollExhausted => return DownloadOutcome::Timeout,
                BlockedVerdict::ChallengeStuck => {
                    last_reason = DownloadOutcome::ChallengePresented;
                    continue;
                }
                BlockedVerdict::NoChallenge => continue,
            }
        }

        warn!("Download retries exhausted: {:?}", last_reason);
        last_reason
    }

    /// First selector strategy with a live match wins.
    async fn locate(&self, driver: &mut dyn Driver) -> Option<String> {
        for selector in &self.config.button_selectors {
            if driver.exists(selector, self.config.find_timeout()).await {
                debug!("Download control matched: {}", selector);
                return Some(selector.clone());
            }
        }
        None
    }

    /// Alternate strategy when clicking faults: read the control's href
    /// and fetch the archive directly into `target_dir`.
    async fn direct_fetch(
        &self,
        driver: &mut dyn Driver,
        selector: &str,
        target_dir: &Path,
    ) -> Option<PathBuf> {
        let href = match driver.read_attribute(selector, "href").await {
            Ok(Some(href)) if !href.is_empty() => href,
            _ => {
                debug!("No href on {} for a direct fetch", selector);
                return None;
            }
        };

        let dest = target_dir.join(self.direct_fetch_name(&href));
        info!("Fetching {} directly", href);
        match driver.save_resource(&href, &dest).await {
            Ok(()) => Some(dest),
            Err(e) => {
                warn!("Direct fetch of {} failed: {}", href, e);
                None
            }
        }
    }

    /// Archive filename for a direct fetch, from the href's last path
    /// segment, forced onto the archive extension.
    fn direct_fetch_name(&self, href: &str) -> String {
        let stem = href
            .rsplit('/')
            .next()
            .and_then(|s| s.split(['?', '#']).next())
            .filter(|s| !s.is_empty())
            .unwrap_or("artifact");
        let name = crate::storage::sanitize_filename(stem);
        let has_extension = Path::new(&name)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(&self.config.archive_extension))
            .unwrap_or(false);
        if has_extension {
            name
        } else {
            format!("{}.{}", name, self.config.archive_extension)
        }
    }

    /// Poll the directory for a new archive against `before`.
    async fn poll(&self, target_dir: &Path, before: &HashSet<OsString>) -> Option<PathBuf> {
        for _ in 0..self.config.poll_iterations {
            tokio::time::sleep(self.config.poll_interval()).await;
            if let Some(path) = self.new_archive(target_dir, before) {
                return Some(path);
            }
        }
        None
    }

    /// Challenge check after a failed pass. On a cleared challenge the
    /// machine re-enters Poll, reusing the original before-set so a
    /// download started by the earlier click still counts as new.
    async fn blocked(
        &self,
        driver: &mut dyn Driver,
        resolver: &ChallengeResolver,
        before: Option<&HashSet<OsString>>,
        target_dir: &Path,
    ) -> BlockedVerdict {
        match resolver.attempt_clear(driver).await {
            ChallengeOutcome::Cleared => {
                // With no earlier click the resolver's submit is the
                // trigger; a fresh snapshot excludes pre-existing files.
                let fresh;
                let before = match before {
                    Some(before) => before,
                    None => {
                        fresh = snapshot(target_dir);
                        &fresh
                    }
                };
                match self.poll(target_dir, before).await {
                    Some(path) => BlockedVerdict::Recovered(path),
                    None => BlockedVerdict::PollExhausted,
                }
            }
            ChallengeOutcome::Failed(reason) => {
                warn!("Challenge could not be cleared: {}", reason);
                let _ = driver.refresh().await;
                BlockedVerdict::ChallengeStuck
            }
            ChallengeOutcome::NotPresent => {
                let _ = driver.refresh().await;
                BlockedVerdict::NoChallenge
            }
        }
    }

    /// One new file with the archive extension, lexicographically first
    /// when several appear at once.
    fn new_archive(&self, target_dir: &Path, before: &HashSet<OsString>) -> Option<PathBuf> {
        let mut candidates: Vec<OsString> = snapshot(target_dir)
            .into_iter()
            .filter(|name| !before.contains(name))
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(&self.config.archive_extension))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next().map(|n| target_dir.join(n))
    }
}

enum BlockedVerdict {
    Recovered(PathBuf),
    PollExhausted,
    ChallengeStuck,
    NoChallenge,
}

/// Current filenames in `dir`; missing or unreadable dir reads as empty.
fn snapshot(dir: &Path) -> HashSet<OsString> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect(),
        Err(_) => HashSet::new(),
    }
}
