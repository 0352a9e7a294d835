//! chromiumoxide-backed [`Driver`] implementation.
//!
//! Launches (or connects to) a Chrome instance over CDP, keeps a single
//! page alive for the whole session, and steers browser-initiated
//! downloads into a caller-chosen directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{NavigateParams, ReloadParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{BrowserEngineConfig, Driver, DriverError};

/// Default user agent for browser requests.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Interval between element-presence probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Single-session CDP driver.
pub struct CdpDriver {
    config: BrowserEngineConfig,
    browser: Browser,
    page: Page,
}

impl CdpDriver {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    /// Launch a browser (or connect to a remote one) and open the session page.
    pub async fn launch(config: BrowserEngineConfig) -> Result<Self> {
        let browser = if let Some(remote_url) = config.remote_url.clone() {
            Self::connect_remote(&remote_url, config.timeout).await?
        } else {
            Self::launch_local(&config).await?
        };

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open session page")?;

        page.execute(SetUserAgentOverrideParams::new(
            BROWSER_USER_AGENT.to_string(),
        ))
        .await
        .context("Failed to set user agent")?;

        Ok(Self {
            config,
            browser,
            page,
        })
    }

    async fn launch_local(config: &BrowserEngineConfig) -> Result<Browser> {
        info!("Launching browser (headless={})", config.headless);

        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless, confusingly
        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--safebrowsing-disable-auto-update")
            .arg("--no-sandbox") // Often needed for headless in containers/restricted environments
            .arg("--disable-gpu") // Recommended for headless
            .arg("--disable-software-rasterizer");

        for arg in &config.chrome_args {
            builder = builder.arg(arg.as_str());
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // Spawn handler task
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(url: &str, timeout: u64) -> Result<Browser> {
        info!("Connecting to remote browser at {} (timeout: {}s)", url, timeout);

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        info!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(timeout),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    /// Find a Chrome executable on this machine.
    fn find_chrome() -> Result<PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or download from: https://www.google.com/chrome/"
        ))
    }

    /// Map a CDP error onto the driver taxonomy.
    fn classify(what: &str, err: impl std::fmt::Display) -> DriverError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            DriverError::Timeout(Duration::ZERO, what.to_string())
        } else if lower.contains("detached")
            || lower.contains("not belong")
            || lower.contains("could not find node")
            || lower.contains("no node")
        {
            DriverError::Stale(format!("{}: {}", what, msg))
        } else {
            DriverError::Protocol(format!("{}: {}", what, msg))
        }
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| DriverError::Protocol(format!("invalid URL {}: {}", url, e)))?;

        let nav_timeout = Duration::from_secs(self.config.timeout);
        tokio::time::timeout(nav_timeout, self.page.execute(nav_params))
            .await
            .map_err(|_| DriverError::Timeout(nav_timeout, url.to_string()))?
            .map_err(|e| Self::classify(url, e))?;

        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), DriverError> {
        let ready_timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(
            ready_timeout,
            self.page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("Could not check ready state (possibly non-HTML page): {}", e);
                Ok(())
            }
            Err(_) => Err(DriverError::Timeout(
                ready_timeout,
                "document ready state".to_string(),
            )),
        }
    }

    async fn exists(&mut self, selector: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| Self::classify(selector, e))?;
        Ok(())
    }

    async fn click_for_download(
        &mut self,
        selector: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(|e| DriverError::Protocol(format!("download behavior: {}", e)))?;
        self.page
            .execute(behavior)
            .await
            .map_err(|e| Self::classify("set download behavior", e))?;

        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;

        match tokio::time::timeout(timeout, element.click()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(Self::classify(selector, e)),
            Err(_) => {
                warn!("Download click on {} hit the {:?} timeout", selector, timeout);
                Ok(false)
            }
        }
    }

    async fn read_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element
            .attribute(attribute)
            .await
            .map_err(|e| Self::classify(selector, e))
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element
            .inner_text()
            .await
            .map_err(|e| Self::classify(selector, e))
    }

    async fn attribute_all(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DriverError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;

        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(value) = element
                .attribute(attribute)
                .await
                .map_err(|e| Self::classify(selector, e))?
            {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| Self::classify(selector, e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| Self::classify(selector, e))?;
        Ok(())
    }

    async fn save_resource(&mut self, url: &str, dest: &Path) -> Result<(), DriverError> {
        debug!("Fetching resource {} -> {}", url, dest.display());

        // Fetch from within the page so the session's cookies and
        // anti-bot clearances apply; the bytes come back as base64.
        let fetch_script = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch('{}', {{
                        method: 'GET',
                        credentials: 'include'
                    }});
                    if (!response.ok) {{
                        return {{ error: `HTTP ${{response.status}}: ${{response.statusText}}` }};
                    }}
                    const blob = await response.blob();
                    const arrayBuffer = await blob.arrayBuffer();
                    const bytes = new Uint8Array(arrayBuffer);
                    let binary = '';
                    for (let i = 0; i < bytes.length; i++) {{
                        binary += String.fromCharCode(bytes[i]);
                    }}
                    return {{ data: btoa(binary), size: bytes.length }};
                }} catch (e) {{
                    return {{ error: e.toString() }};
                }}
            }})()
            "#,
            url
        );

        let result: serde_json::Value = self
            .page
            .evaluate(fetch_script)
            .await
            .map_err(|e| Self::classify(url, e))?
            .into_value()
            .map_err(|e| DriverError::Protocol(format!("fetch result: {}", e)))?;

        if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
            return Err(DriverError::Protocol(format!(
                "in-page fetch of {} failed: {}",
                url, error
            )));
        }

        let data_b64 = result.get("data").and_then(|d| d.as_str()).unwrap_or("");
        let data = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| DriverError::Protocol(format!("base64 decode: {}", e)))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DriverError::Protocol(format!("create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| DriverError::Protocol(format!("write {}: {}", dest.display(), e)))?;

        debug!("Saved {} bytes to {}", data.len(), dest.display());
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), DriverError> {
        self.page
            .execute(ReloadParams::default())
            .await
            .map_err(|e| Self::classify("reload", e))?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close reported: {}", e);
        }
        Ok(())
    }
}
