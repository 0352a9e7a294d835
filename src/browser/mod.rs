//! Browser automation boundary.
//!
//! Everything the crawl needs from a browser goes through the [`Driver`]
//! trait; the chromiumoxide (CDP) implementation lives in `cdp` behind
//! the `browser` feature, with a stub for builds without it. Keeping the
//! boundary a trait lets the download machine and challenge resolver be
//! exercised against a scripted fake.

mod config;

#[cfg(feature = "browser")]
mod cdp;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use config::BrowserEngineConfig;

#[cfg(feature = "browser")]
pub use cdp::CdpDriver;

/// Errors surfaced by browser operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?} waiting on {1}")]
    Timeout(Duration, String),

    #[error("stale element reference: {0}")]
    Stale(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Faults that are recovered by refreshing the page and retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Stale(_))
    }
}

/// Synchronous-feeling browser operations, one logical actor at a time.
///
/// All selectors are CSS. Every method blocks (via await) until the
/// operation completes or its internal timeout fires.
#[async_trait]
pub trait Driver: Send {
    /// Navigate to a URL.
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Wait until the document reports a loaded state.
    async fn wait_for_load(&mut self) -> Result<(), DriverError>;

    /// Whether an element matching the selector appears within the timeout.
    async fn exists(&mut self, selector: &str, timeout: Duration) -> bool;

    /// Click the first element matching the selector.
    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Click a control expected to start a download into `dir`.
    ///
    /// Returns `Ok(false)` when the click landed but the page reported no
    /// download/navigation starting; the caller decides what that means.
    async fn click_for_download(
        &mut self,
        selector: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<bool, DriverError>;

    /// Read an attribute off the first matching element.
    async fn read_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Read the inner text of the first matching element.
    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError>;

    /// Collect an attribute from every matching element, in document order.
    async fn attribute_all(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DriverError>;

    /// Type text into the first matching element.
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Fetch a resource from within the page session and write it to `dest`.
    async fn save_resource(&mut self, url: &str, dest: &Path) -> Result<(), DriverError>;

    /// Reload the current page.
    async fn refresh(&mut self) -> Result<(), DriverError>;

    /// Tear the browser down.
    async fn quit(&mut self) -> Result<(), DriverError>;
}

// Stub for when browser support is disabled.
#[cfg(not(feature = "browser"))]
pub struct CdpDriver;

#[cfg(not(feature = "browser"))]
impl CdpDriver {
    pub async fn launch(_config: BrowserEngineConfig) -> anyhow::Result<Self> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }

    fn unavailable() -> DriverError {
        DriverError::Protocol("browser support not compiled".to_string())
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl Driver for CdpDriver {
    async fn navigate(&mut self, _url: &str) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn wait_for_load(&mut self) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn exists(&mut self, _selector: &str, _timeout: Duration) -> bool {
        false
    }

    async fn click(&mut self, _selector: &str) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn click_for_download(
        &mut self,
        _selector: &str,
        _dir: &Path,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        Err(Self::unavailable())
    }

    async fn read_attribute(
        &mut self,
        _selector: &str,
        _attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        Err(Self::unavailable())
    }

    async fn read_text(&mut self, _selector: &str) -> Result<Option<String>, DriverError> {
        Err(Self::unavailable())
    }

    async fn attribute_all(
        &mut self,
        _selector: &str,
        _attribute: &str,
    ) -> Result<Vec<String>, DriverError> {
        Err(Self::unavailable())
    }

    async fn type_text(&mut self, _selector: &str, _text: &str) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn save_resource(&mut self, _url: &str, _dest: &Path) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn refresh(&mut self) -> Result<(), DriverError> {
        Err(Self::unavailable())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
