//! Configuration loading for craftacquire.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::browser::BrowserEngineConfig;
use crate::download::DownloadConfig;
use crate::pacing::PacingConfig;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "craftacquire.db";

/// Top-level configuration. Every field has a default so an empty file
/// (or no file at all) still yields a runnable setup.
#[derive(Debug, Clone, Deserialize)]
pub struct CraftConfig {
    /// Catalog listing to crawl.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Page count assumed until the listing tells us otherwise.
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
    /// Catalog title used when an item page carries no breadcrumb.
    #[serde(default = "default_catalog_title")]
    pub catalog_title: String,
    /// Where artifacts land.
    #[serde(default = "default_download_root")]
    pub download_root: String,
    /// Optional secondary mirror of completed item directories.
    #[serde(default)]
    pub backup_root: Option<String>,
    /// Ledger database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Items whose publish date is older than this halt the crawl.
    #[serde(default)]
    pub max_item_age_days: Option<u32>,
    /// Speech-to-text endpoint for the challenge solver.
    #[serde(default)]
    pub transcriber_endpoint: Option<String>,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

fn default_base_url() -> String {
    "https://www.creativefabrica.com/embroidery/".to_string()
}

fn default_total_pages() -> u32 {
    100
}

fn default_catalog_title() -> String {
    "embroidery".to_string()
}

fn data_root() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("craftacquire")
}

fn default_download_root() -> String {
    data_root().join("downloads").to_string_lossy().to_string()
}

fn default_db_path() -> String {
    data_root()
        .join(DEFAULT_DATABASE_FILENAME)
        .to_string_lossy()
        .to_string()
}

impl Default for CraftConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            total_pages: default_total_pages(),
            catalog_title: default_catalog_title(),
            download_root: default_download_root(),
            backup_root: None,
            db_path: default_db_path(),
            max_item_age_days: None,
            transcriber_endpoint: None,
            pacing: PacingConfig::default(),
            browser: BrowserEngineConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl CraftConfig {
    /// Load from an explicit path, or fall back to `craftacquire.toml`
    /// in the working directory, or defaults when neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let local = PathBuf::from("craftacquire.toml");
                local.exists().then_some(local)
            }
        };

        match candidate {
            Some(p) => {
                let contents = std::fs::read_to_string(&p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Tilde-expanded download root.
    pub fn download_root(&self) -> PathBuf {
        expand(&self.download_root)
    }

    /// Tilde-expanded backup root, when configured.
    pub fn backup_root(&self) -> Option<PathBuf> {
        self.backup_root.as_deref().map(expand)
    }

    /// Tilde-expanded database path.
    pub fn db_path(&self) -> PathBuf {
        expand(&self.db_path)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("craftacquire.toml");
        std::fs::write(&path, "").unwrap();

        let config = CraftConfig::load(Some(&path)).unwrap();
        assert_eq!(config.total_pages, 100);
        assert_eq!(config.download.max_retries, 3);
        assert!(config.browser.headless);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("craftacquire.toml");
        std::fs::write(
            &path,
            r#"
            base_url = "https://market.example/fonts/"
            max_item_age_days = 30

            [download]
            max_retries = 5

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        let config = CraftConfig::load(Some(&path)).unwrap();
        assert_eq!(config.base_url, "https://market.example/fonts/");
        assert_eq!(config.max_item_age_days, Some(30));
        assert_eq!(config.download.max_retries, 5);
        assert!(!config.browser.headless);
        // Untouched sections keep their defaults.
        assert_eq!(config.download.poll_iterations, 30);
        assert_eq!(config.pacing.short_rest_interval, 50);
    }

    #[test]
    fn tilde_paths_are_expanded() {
        let config = CraftConfig {
            download_root: "~/downloads".to_string(),
            ..Default::default()
        };
        assert!(!config.download_root().to_string_lossy().starts_with('~'));
    }
}
