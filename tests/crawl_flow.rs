//! End-to-end crawl against a scripted browser.
//!
//! One catalog page with one item: the fake driver serves the listing
//! link, the item page metadata, a preview image, and a real zip that
//! lands in the watched directory when the download button is clicked.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use craftacquire::browser::{Driver, DriverError};
use craftacquire::challenge::{ChallengeResolver, NoopSolver};
use craftacquire::config::CraftConfig;
use craftacquire::download::{DownloadAttemptMachine, DownloadConfig};
use craftacquire::ledger::{CrawlStatus, LedgerRepository};
use craftacquire::orchestrator::{CrawlOrchestrator, NeverHalt};
use craftacquire::pacing::{PacingConfig, PacingController, RandomSource};
use craftacquire::site;

const BASE_URL: &str = "https://market.example/embroidery/";
const ITEM_URL: &str = "https://market.example/product/rose-monogram/";

/// Deterministic randomness: no filler actions, minimum waits.
struct NoRandom;

impl RandomSource for NoRandom {
    fn chance(&mut self, _p: f64) -> bool {
        false
    }

    fn uniform(&mut self, min: f64, _max: f64) -> f64 {
        min
    }

    fn pick(&mut self, _len: usize) -> usize {
        0
    }
}

struct MarketplaceFake {
    navigations: Vec<String>,
}

impl MarketplaceFake {
    fn new() -> Self {
        Self {
            navigations: Vec::new(),
        }
    }

    fn zip_bytes() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("rose-monogram.dst", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"stitch data").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }
}

#[async_trait]
impl Driver for MarketplaceFake {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn exists(&mut self, selector: &str, _timeout: Duration) -> bool {
        selector == site::DOWNLOAD_BUTTON_SELECTORS[0]
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        Err(DriverError::NotFound(selector.to_string()))
    }

    async fn click_for_download(
        &mut self,
        selector: &str,
        dir: &Path,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        assert_eq!(selector, site::DOWNLOAD_BUTTON_SELECTORS[0]);
        std::fs::write(dir.join("rose-monogram.zip"), Self::zip_bytes())
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(true)
    }

    async fn read_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        match (selector, attribute) {
            (site::PREVIEW_IMAGE_SELECTOR, "src") => {
                Ok(Some("https://cdn.example/previews/rose.jpg".to_string()))
            }
            _ => Err(DriverError::NotFound(selector.to_string())),
        }
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        match selector {
            site::DETAIL_TITLE_SELECTOR => Ok(Some("Rose Monogram".to_string())),
            site::CATEGORY_SELECTOR => Ok(Some("Embroidery".to_string())),
            _ => Err(DriverError::NotFound(selector.to_string())),
        }
    }

    async fn attribute_all(
        &mut self,
        selector: &str,
        _attribute: &str,
    ) -> Result<Vec<String>, DriverError> {
        if selector == site::PRODUCT_LINK_SELECTOR {
            Ok(vec!["/product/rose-monogram/".to_string()])
        } else {
            Err(DriverError::NotFound(selector.to_string()))
        }
    }

    async fn type_text(&mut self, selector: &str, _text: &str) -> Result<(), DriverError> {
        Err(DriverError::NotFound(selector.to_string()))
    }

    async fn save_resource(&mut self, _url: &str, dest: &Path) -> Result<(), DriverError> {
        std::fs::write(dest, b"jpeg bytes").map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn refresh(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

fn test_config(tmp: &tempfile::TempDir) -> CraftConfig {
    CraftConfig {
        base_url: BASE_URL.to_string(),
        total_pages: 1,
        download_root: tmp.path().join("downloads").to_string_lossy().to_string(),
        backup_root: Some(tmp.path().join("backup").to_string_lossy().to_string()),
        db_path: tmp.path().join("ledger.db").to_string_lossy().to_string(),
        download: DownloadConfig {
            max_retries: 2,
            poll_iterations: 5,
            poll_interval_ms: 10,
            find_timeout_secs: 0,
            ..Default::default()
        },
        pacing: PacingConfig {
            page_load: (0.0, 0.0),
            element_find: (0.0, 0.0),
            between_actions: (0.0, 0.0),
            between_pages: (0.0, 0.0),
            short_rest_range: (0.0, 0.0),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn full_item_flow_lands_artifacts_and_advances_cursor() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    let download_config = config.download.clone();
    let pacing_config = config.pacing.clone();
    let db_path = config.db_path();

    let ledger = LedgerRepository::new(&db_path).unwrap();
    let resolver = ChallengeResolver::new(
        site::CHALLENGE_MARKERS.iter().map(|s| s.to_string()).collect(),
        Box::new(NoopSolver),
    )
    .with_timings(Duration::from_millis(1), Duration::from_millis(1));

    let mut orchestrator = CrawlOrchestrator::new(
        config,
        ledger,
        PacingController::with_rng(pacing_config, Box::new(NoRandom)),
        DownloadAttemptMachine::new(download_config),
        resolver,
        Box::new(NeverHalt),
    );

    let mut driver = MarketplaceFake::new();
    let summary = orchestrator.run(&mut driver).await.unwrap();

    assert_eq!(summary.pages_visited, 1);
    assert_eq!(summary.items_processed, 1);
    assert!(!summary.halted);
    assert_eq!(driver.navigations, vec![
        "https://market.example/embroidery".to_string(),
        ITEM_URL.to_string(),
    ]);

    // Ledger: one success record pointing at the item directory.
    let probe = LedgerRepository::new(&db_path).unwrap();
    let record = probe.get(ITEM_URL).unwrap().unwrap();
    assert_eq!(record.status, CrawlStatus::Success);
    assert_eq!(record.detail_title.as_deref(), Some("Rose Monogram"));
    let item_dir = PathBuf::from(record.download_path.unwrap());

    // Archive extracted in place and removed afterwards.
    assert!(item_dir.join("rose-monogram/rose-monogram.dst").exists());
    assert!(!item_dir.join("rose-monogram.zip").exists());
    // Preview image fetched alongside.
    assert!(item_dir.join("rose.jpg").exists());

    // Backup mirrors the item directory under the same relative path.
    let backup_dir = tmp.path().join("backup/Embroidery_Rose Monogram");
    assert!(backup_dir.join("rose-monogram/rose-monogram.dst").exists());

    // Cursor advanced past the only page.
    let cursor = probe.progress(BASE_URL, 1).unwrap();
    assert_eq!(cursor.current_page, 2);
}
