//! Pacing configuration.

use serde::{Deserialize, Serialize};

/// The kind of wait being taken between network-visible actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// After a navigation, while the page settles.
    PageLoad,
    /// Before probing for an element.
    ElementFind,
    /// Between actions on the same page.
    BetweenActions,
    /// Between catalog pages.
    BetweenPages,
}

/// Delay bounds and rest policy. All bounds are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// (min, max) wait after a page load.
    #[serde(default = "default_page_load")]
    pub page_load: (f64, f64),

    /// (min, max) wait before element lookups.
    #[serde(default = "default_element_find")]
    pub element_find: (f64, f64),

    /// (min, max) wait between actions on one page.
    #[serde(default = "default_between_actions")]
    pub between_actions: (f64, f64),

    /// (min, max) wait between catalog pages.
    #[serde(default = "default_between_pages")]
    pub between_pages: (f64, f64),

    /// Maximum continuous session runtime before a long rest, in hours.
    #[serde(default = "default_max_continuous_hours")]
    pub max_continuous_hours: f64,

    /// Base duration of a long rest in hours; up to half an hour of
    /// jitter is added on top.
    #[serde(default = "default_long_rest_hours")]
    pub long_rest_hours: f64,

    /// Item-count interval at which a long rest becomes possible.
    #[serde(default = "default_long_rest_interval")]
    pub long_rest_interval: u64,

    /// Probability of actually taking the interval-triggered long rest.
    #[serde(default = "default_long_rest_probability")]
    pub long_rest_probability: f64,

    /// Item-count interval for short rests.
    #[serde(default = "default_short_rest_interval")]
    pub short_rest_interval: u64,

    /// (min, max) duration of a short rest, in seconds.
    #[serde(default = "default_short_rest_range")]
    pub short_rest_range: (f64, f64),
}

impl PacingConfig {
    /// Configured base bounds for a wait kind.
    pub fn bounds(&self, kind: WaitKind) -> (f64, f64) {
        match kind {
            WaitKind::PageLoad => self.page_load,
            WaitKind::ElementFind => self.element_find,
            WaitKind::BetweenActions => self.between_actions,
            WaitKind::BetweenPages => self.between_pages,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page_load: default_page_load(),
            element_find: default_element_find(),
            between_actions: default_between_actions(),
            between_pages: default_between_pages(),
            max_continuous_hours: default_max_continuous_hours(),
            long_rest_hours: default_long_rest_hours(),
            long_rest_interval: default_long_rest_interval(),
            long_rest_probability: default_long_rest_probability(),
            short_rest_interval: default_short_rest_interval(),
            short_rest_range: default_short_rest_range(),
        }
    }
}

fn default_page_load() -> (f64, f64) {
    (3.0, 8.0)
}

fn default_element_find() -> (f64, f64) {
    (2.0, 5.0)
}

fn default_between_actions() -> (f64, f64) {
    (4.0, 10.0)
}

fn default_between_pages() -> (f64, f64) {
    (10.0, 20.0)
}

fn default_max_continuous_hours() -> f64 {
    12.0
}

fn default_long_rest_hours() -> f64 {
    1.0
}

fn default_long_rest_interval() -> u64 {
    500
}

fn default_long_rest_probability() -> f64 {
    0.4
}

fn default_short_rest_interval() -> u64 {
    50
}

fn default_short_rest_range() -> (f64, f64) {
    (30.0, 60.0)
}
