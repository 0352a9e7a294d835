//! Anti-detection pacing controller.
//!
//! Randomizes the delay before every network-visible action based on
//! time of day and session volume, and injects periodic rest breaks so a
//! long-running session keeps the request cadence of one human operator.
//! All suspension is a plain sleep; nothing here runs concurrently.

mod config;
mod rng;

use std::time::Instant;

use chrono::{Local, Timelike};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

pub use config::{PacingConfig, WaitKind};
pub use rng::{RandomSource, ThreadRandom};

#[cfg(test)]
pub use rng::ScriptedRandom;

/// Probability that the sampled upper bound is stretched for a fat-tail delay.
const FAT_TAIL_PROBABILITY: f64 = 0.2;
const FAT_TAIL_FACTOR: f64 = 1.5;

/// Probability of simulating a filler action before a wait.
const FILLER_PROBABILITY: f64 = 0.2;

/// Emit a throughput observation every this many waits.
const STATS_INTERVAL: u64 = 50;

const VOLUME_STEP: u64 = 200;
const VOLUME_INCREMENT: f64 = 0.1;
const VOLUME_CEILING: f64 = 2.0;

/// Mutable counters for one continuous session.
///
/// Owned by the controller rather than living in a process-wide global so
/// independent controllers can coexist in tests.
#[derive(Debug, Clone)]
pub struct PacingState {
    /// Waits taken so far this session.
    pub request_count: u64,
    /// When the continuous-runtime clock last (re)started.
    pub session_start: Instant,
}

impl Default for PacingState {
    fn default() -> Self {
        Self {
            request_count: 0,
            session_start: Instant::now(),
        }
    }
}

/// Computes and executes randomized waits and rest breaks.
pub struct PacingController {
    config: PacingConfig,
    state: PacingState,
    rng: Box<dyn RandomSource>,
}

impl PacingController {
    /// Create a controller with the default thread RNG.
    pub fn new(config: PacingConfig) -> Self {
        Self::with_rng(config, Box::new(ThreadRandom))
    }

    /// Create a controller with an injected randomness source.
    pub fn with_rng(config: PacingConfig, rng: Box<dyn RandomSource>) -> Self {
        Self {
            config,
            state: PacingState::default(),
            rng,
        }
    }

    pub fn request_count(&self) -> u64 {
        self.state.request_count
    }

    /// Hours since the continuous-runtime clock last restarted.
    pub fn session_elapsed_hours(&self) -> f64 {
        self.state.session_start.elapsed().as_secs_f64() / 3600.0
    }

    /// Hour-of-day multiplier: quicker overnight, slower during business peaks.
    pub fn hour_multiplier(hour: u32) -> f64 {
        match hour {
            0..=7 => 0.8,
            9..=12 | 14..=18 => 1.2,
            _ => 1.0,
        }
    }

    /// Volume multiplier: grows 10% per 200 requests, capped at 2.0.
    pub fn volume_multiplier(request_count: u64) -> f64 {
        (1.0 + (request_count / VOLUME_STEP) as f64 * VOLUME_INCREMENT).min(VOLUME_CEILING)
    }

    /// Wait using the configured bounds for `kind`. Returns elapsed seconds.
    pub async fn wait(&mut self, kind: WaitKind) -> f64 {
        self.wait_inner(kind, None).await
    }

    /// Wait with explicit base bounds, still subject to the multipliers.
    pub async fn wait_bounded(&mut self, kind: WaitKind, min: f64, max: f64) -> f64 {
        self.wait_inner(kind, Some((min, max))).await
    }

    async fn wait_inner(&mut self, kind: WaitKind, bounds: Option<(f64, f64)>) -> f64 {
        self.filler_action().await;

        let hour = Local::now().hour();
        let wait = self.sample(kind, bounds, hour);
        sleep(Duration::from_secs_f64(wait)).await;
        wait
    }

    /// Sample a wait duration and account for it. Separated from the sleep
    /// so tests can verify the distribution without waiting it out.
    fn sample(&mut self, kind: WaitKind, bounds: Option<(f64, f64)>, hour: u32) -> f64 {
        let (base_min, base_max) = bounds.unwrap_or_else(|| self.config.bounds(kind));

        let multiplier =
            Self::hour_multiplier(hour) * Self::volume_multiplier(self.state.request_count);
        let min = base_min * multiplier;
        let mut max = base_max * multiplier;

        // Mostly stay in the tight range; occasionally take a longer pause.
        if self.rng.chance(FAT_TAIL_PROBABILITY) {
            max *= FAT_TAIL_FACTOR;
        }

        let wait = self.rng.uniform(min, max);
        self.state.request_count += 1;

        if self.state.request_count % STATS_INTERVAL == 0 {
            let elapsed = self.session_elapsed_hours();
            let rate = if elapsed > 0.0 {
                self.state.request_count as f64 / elapsed
            } else {
                0.0
            };
            info!(
                "Pacing stats: requests={}, elapsed={:.1}h, rate={:.1}/h, multiplier={:.2}",
                self.state.request_count, elapsed, rate, multiplier
            );
        }

        debug!(
            "Wait ({:?}): {:.1}s (min={:.1}, max={:.1}, multiplier={:.2})",
            kind, wait, min, max, multiplier
        );
        wait
    }

    /// Occasionally simulate a human filler action. Only the extra delay is
    /// observable; no browser interaction happens here.
    async fn filler_action(&mut self) {
        if !self.rng.chance(FILLER_PROBABILITY) {
            return;
        }

        let (name, min, max) = match self.rng.pick(4) {
            0 => ("scroll", 0.5, 1.5),
            1 => ("mouse-move", 0.3, 1.0),
            2 => ("pause", 0.5, 2.0),
            _ => ("viewport-change", 0.5, 1.0),
        };
        let pause = self.rng.uniform(min, max);
        debug!("Filler action {}: {:.1}s", name, pause);
        sleep(Duration::from_secs_f64(pause)).await;
    }

    /// Whether the session has earned a long rest.
    ///
    /// Trips on continuous runtime reaching the ceiling, or on the item
    /// count hitting the configured interval combined with a coin flip.
    pub fn needs_long_rest(&mut self, items_processed: u64) -> bool {
        let elapsed = self.session_elapsed_hours();
        if elapsed >= self.config.max_continuous_hours {
            warn!(
                "Continuous runtime {:.1}h reached the {:.0}h ceiling",
                elapsed, self.config.max_continuous_hours
            );
            return true;
        }

        if items_processed > 0 && items_processed % self.config.long_rest_interval == 0 {
            info!("{} items processed, considering a long rest", items_processed);
            return self.rng.chance(self.config.long_rest_probability);
        }

        false
    }

    /// Sleep for the long-rest duration and restart the runtime clock.
    pub async fn long_rest(&mut self) {
        let hours = self.config.long_rest_hours + self.rng.uniform(0.0, 0.5);
        let seconds = hours * 3600.0;
        warn!("Taking a long rest: {:.1}h ({:.0}s)", hours, seconds);

        sleep(Duration::from_secs_f64(seconds)).await;

        self.state.session_start = Instant::now();
        info!("Long rest over, resuming");
    }

    /// Whether the item count calls for a short rest.
    pub fn needs_short_rest(&self, items_processed: u64) -> bool {
        items_processed > 0 && items_processed % self.config.short_rest_interval == 0
    }

    /// Sleep for the short-rest duration. Session state is untouched.
    pub async fn short_rest(&mut self) {
        let (min, max) = self.config.short_rest_range;
        let seconds = self.rng.uniform(min, max);
        info!("Taking a short rest: {:.1}s", seconds);
        sleep(Duration::from_secs_f64(seconds)).await;
    }
}
