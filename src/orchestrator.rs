//! Crawl orchestration: pages, items, and stop conditions.
//!
//! Walks the paginated listing from the persisted cursor, dispatches
//! every not-yet-done item through the download machine, and folds each
//! item's artifacts into exactly one ledger write. A tripped stop policy
//! abandons the rest of the current page and ends the whole crawl.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{Driver, DriverError};
use crate::challenge::ChallengeResolver;
use crate::config::CraftConfig;
use crate::download::{DownloadAttemptMachine, DownloadOutcome};
use crate::ledger::{CrawlRecord, CrawlStatus, LedgerRepository};
use crate::pacing::{PacingController, WaitKind};
use crate::{site, storage};

/// Extra between-pages rest every this many pages.
const LONG_PAGE_REST_EVERY: u32 = 20;

/// What the orchestrator learned about an item before processing it.
pub struct ItemContext {
    pub url: String,
    pub published: Option<DateTime<Utc>>,
}

/// Global circuit breaker evaluated per item. A `true` verdict ends the
/// entire crawl, not just the current item.
pub trait StopPolicy: Send {
    fn should_halt(&self, item: &ItemContext) -> bool;
}

/// Never halts; crawls the listing to its last page.
pub struct NeverHalt;

impl StopPolicy for NeverHalt {
    fn should_halt(&self, _item: &ItemContext) -> bool {
        false
    }
}

/// Halts once items get older than the configured age. Listings are
/// newest-first, so the first stale item marks the end of fresh content.
pub struct StalenessPolicy {
    pub max_age_days: u32,
}

impl StopPolicy for StalenessPolicy {
    fn should_halt(&self, item: &ItemContext) -> bool {
        match item.published {
            Some(published) => {
                let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.max_age_days));
                if published < cutoff {
                    info!(
                        "Item {} published {} predates the {}-day window",
                        item.url, published, self.max_age_days
                    );
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

/// Totals for one `run` invocation.
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub pages_visited: u32,
    pub items_processed: u64,
    pub items_skipped: u64,
    pub halted: bool,
}

enum PageOutcome {
    Completed,
    Halted,
}

enum ItemVerdict {
    Record(CrawlRecord),
    Halt,
}

/// Sequences the crawl. Strictly one page and one item at a time.
pub struct CrawlOrchestrator {
    config: CraftConfig,
    ledger: LedgerRepository,
    pacing: PacingController,
    machine: DownloadAttemptMachine,
    resolver: ChallengeResolver,
    stop_policy: Box<dyn StopPolicy>,
    items_processed: u64,
}

impl CrawlOrchestrator {
    pub fn new(
        config: CraftConfig,
        ledger: LedgerRepository,
        pacing: PacingController,
        machine: DownloadAttemptMachine,
        resolver: ChallengeResolver,
        stop_policy: Box<dyn StopPolicy>,
    ) -> Self {
        Self {
            config,
            ledger,
            pacing,
            machine,
            resolver,
            stop_policy,
            items_processed: 0,
        }
    }

    /// Run the crawl from the persisted cursor to the last page, a halt,
    /// or an unrecoverable error.
    pub async fn run(&mut self, driver: &mut dyn Driver) -> Result<CrawlSummary> {
        let base_url = self.config.base_url.clone();
        let cursor = self
            .ledger
            .progress(&base_url, self.config.total_pages)
            .context("Failed to load the page cursor")?;
        let total_pages = cursor.total_pages;

        info!(
            "Crawling {} from page {}/{}",
            base_url, cursor.current_page, total_pages
        );

        let mut summary = CrawlSummary::default();

        for page in cursor.current_page..=total_pages {
            let outcome = match self.process_page(driver, &base_url, page, &mut summary).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A broken page is logged and left behind; the cursor
                    // still moves so a restart does not loop on it.
                    error!("Page {} failed: {:#}", page, e);
                    PageOutcome::Completed
                }
            };
            summary.pages_visited += 1;

            if let PageOutcome::Halted = outcome {
                summary.halted = true;
                info!("Stop policy tripped on page {}; ending the crawl", page);
                break;
            }

            self.ledger
                .update_progress(&base_url, page + 1, total_pages)
                .context("Failed to persist the page cursor")?;

            if page < total_pages {
                if page % LONG_PAGE_REST_EVERY == 0 {
                    self.pacing
                        .wait_bounded(WaitKind::BetweenPages, 20.0, 60.0)
                        .await;
                } else {
                    self.pacing.wait(WaitKind::BetweenPages).await;
                }
            }
        }

        info!(
            "Crawl finished: {} pages, {} items processed, {} skipped{}",
            summary.pages_visited,
            summary.items_processed,
            summary.items_skipped,
            if summary.halted { " (halted)" } else { "" }
        );
        Ok(summary)
    }

    async fn process_page(
        &mut self,
        driver: &mut dyn Driver,
        base_url: &str,
        page: u32,
        summary: &mut CrawlSummary,
    ) -> Result<PageOutcome> {
        let page_url = site::page_url(base_url, page);
        info!("Page {}: {}", page, page_url);

        driver
            .navigate(&page_url)
            .await
            .with_context(|| format!("Failed to open {}", page_url))?;
        let _ = driver.wait_for_load().await;
        self.pacing.wait(WaitKind::PageLoad).await;

        self.pacing.wait(WaitKind::ElementFind).await;
        let links = self.item_links(driver, base_url).await?;
        debug!("Page {}: {} item links", page, links.len());

        for link in links {
            if self.ledger.is_done(&link)? {
                debug!("Skipping already-done {}", link);
                summary.items_skipped += 1;
                continue;
            }

            match self.process_item(driver, &link).await {
                ItemVerdict::Halt => return Ok(PageOutcome::Halted),
                ItemVerdict::Record(record) => {
                    // The single ledger write for this item's outcome.
                    self.ledger.mark(&record)?;
                }
            }

            self.items_processed += 1;
            summary.items_processed += 1;

            if self.pacing.needs_long_rest(self.items_processed) {
                self.pacing.long_rest().await;
            } else if self.pacing.needs_short_rest(self.items_processed) {
                self.pacing.short_rest().await;
            }
        }

        Ok(PageOutcome::Completed)
    }

    /// Item links on the current listing page, absolutized against the base.
    async fn item_links(&mut self, driver: &mut dyn Driver, base_url: &str) -> Result<Vec<String>> {
        let hrefs = match driver
            .attribute_all(site::PRODUCT_LINK_SELECTOR, "href")
            .await
        {
            Ok(hrefs) => hrefs,
            Err(DriverError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e).context("Failed to collect item links"),
        };

        let base = Url::parse(base_url).context("Invalid base URL")?;
        let mut links = Vec::with_capacity(hrefs.len());
        for href in hrefs {
            match base.join(&href) {
                Ok(absolute) => links.push(absolute.to_string()),
                Err(e) => warn!("Skipping unparseable link {:?}: {}", href, e),
            }
        }
        Ok(links)
    }

    async fn process_item(&mut self, driver: &mut dyn Driver, url: &str) -> ItemVerdict {
        match self.process_item_inner(driver, url).await {
            Ok(Some(record)) => ItemVerdict::Record(record),
            Ok(None) => ItemVerdict::Halt,
            Err(e) => {
                error!("Item {} failed: {:#}", url, e);
                let mut record = CrawlRecord::new(url, CrawlStatus::Failed);
                record.error_message = Some(format!("{:#}", e));
                ItemVerdict::Record(record)
            }
        }
    }

    /// Process one item page. `Ok(None)` signals a tripped stop policy.
    async fn process_item_inner(
        &mut self,
        driver: &mut dyn Driver,
        url: &str,
    ) -> Result<Option<CrawlRecord>> {
        driver
            .navigate(url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;
        let _ = driver.wait_for_load().await;
        self.pacing.wait(WaitKind::PageLoad).await;

        // Clearing an interstitial here is best effort; a wall that
        // survives will resurface during the download attempts.
        let _ = self.resolver.attempt_clear(driver).await;

        let context = ItemContext {
            url: url.to_string(),
            published: self.read_published(driver).await,
        };
        if self.stop_policy.should_halt(&context) {
            return Ok(None);
        }

        self.pacing.wait(WaitKind::ElementFind).await;
        let detail_title = driver
            .read_text(site::DETAIL_TITLE_SELECTOR)
            .await
            .ok()
            .flatten()
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        let main_title = driver
            .read_text(site::CATEGORY_SELECTOR)
            .await
            .ok()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.config.catalog_title.clone());

        let download_root = self.config.download_root();
        let item_dir = storage::item_directory(&download_root, &main_title, &detail_title);
        std::fs::create_dir_all(&item_dir)
            .with_context(|| format!("Failed to create {}", item_dir.display()))?;

        self.pacing.wait(WaitKind::BetweenActions).await;
        let have_image = self.save_preview_image(driver, &item_dir).await;
        let have_pdf = self.save_pdf(driver, &item_dir).await;

        self.pacing.wait(WaitKind::BetweenActions).await;
        let outcome = self
            .machine
            .acquire_artifact(driver, &self.resolver, &item_dir)
            .await;

        let have_archive = match &outcome {
            DownloadOutcome::Success(archive) => {
                if let Err(e) = storage::extract_archive(archive) {
                    // The archive itself counts even when extraction does not.
                    warn!("Extraction of {} failed: {:#}", archive.display(), e);
                }
                true
            }
            other => {
                warn!("No archive for {}: {:?}", url, other);
                false
            }
        };

        if have_archive {
            if let Some(backup_root) = self.config.backup_root() {
                if let Err(e) = storage::backup_tree(&item_dir, &download_root, &backup_root) {
                    warn!("Backup of {} failed: {:#}", item_dir.display(), e);
                }
            }
        }

        // The archive alone counts as full success; image and PDF are
        // side artifacts that only matter when the archive is missing.
        let status = if have_archive {
            CrawlStatus::Success
        } else if have_image || have_pdf {
            CrawlStatus::PartialSuccess
        } else {
            CrawlStatus::Failed
        };

        let mut record = CrawlRecord::new(url, status);
        record.main_title = Some(main_title);
        record.detail_title = Some(detail_title);
        record.download_path = Some(item_dir.to_string_lossy().to_string());
        if status == CrawlStatus::Failed {
            record.error_message = Some(format!("no artifacts acquired: {:?}", outcome));
        }
        info!("Item {} -> {}", url, status.as_str());
        Ok(Some(record))
    }

    async fn read_published(&mut self, driver: &mut dyn Driver) -> Option<DateTime<Utc>> {
        let raw = driver
            .read_attribute(site::PUBLISHED_AT_SELECTOR, "datetime")
            .await
            .ok()
            .flatten()?;
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                debug!("Unparseable publish date {:?}: {}", raw, e);
                None
            }
        }
    }

    async fn save_preview_image(&mut self, driver: &mut dyn Driver, item_dir: &Path) -> bool {
        let src = match driver
            .read_attribute(site::PREVIEW_IMAGE_SELECTOR, "src")
            .await
        {
            Ok(Some(src)) => src,
            _ => {
                debug!("No preview image on this item page");
                return false;
            }
        };

        let filename = resource_filename(&src, "preview.jpg");
        match driver.save_resource(&src, &item_dir.join(&filename)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Preview image fetch failed: {}", e);
                false
            }
        }
    }

    async fn save_pdf(&mut self, driver: &mut dyn Driver, item_dir: &Path) -> bool {
        let href = match driver.read_attribute(site::PDF_LINK_SELECTOR, "href").await {
            Ok(Some(href)) => href,
            _ => {
                debug!("No PDF link on this item page");
                return false;
            }
        };

        let filename = resource_filename(&href, "pattern.pdf");
        match driver.save_resource(&href, &item_dir.join(&filename)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("PDF fetch failed: {}", e);
                false
            }
        }
    }
}

/// Filename for a fetched resource, from the URL's last path segment.
fn resource_filename(url: &str, fallback: &str) -> String {
    let name = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .map(|s| storage::sanitize_filename(&s))
        .filter(|s| !s.is_empty());
    name.unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengeResolver, NoopSolver};
    use crate::download::DownloadConfig;
    use crate::pacing::{PacingConfig, ScriptedRandom};
    use crate::testutil::FakeDriver;
    use std::time::Duration;

    struct AlwaysHalt;

    impl StopPolicy for AlwaysHalt {
        fn should_halt(&self, _item: &ItemContext) -> bool {
            true
        }
    }

    fn zero_pacing() -> PacingController {
        let config = PacingConfig {
            page_load: (0.0, 0.0),
            element_find: (0.0, 0.0),
            between_actions: (0.0, 0.0),
            between_pages: (0.0, 0.0),
            short_rest_range: (0.0, 0.0),
            ..Default::default()
        };
        PacingController::with_rng(config, Box::new(ScriptedRandom::default()))
    }

    fn fast_download_config() -> DownloadConfig {
        DownloadConfig {
            max_retries: 1,
            poll_iterations: 1,
            poll_interval_ms: 1,
            find_timeout_secs: 0,
            ..Default::default()
        }
    }

    fn fast_resolver() -> ChallengeResolver {
        ChallengeResolver::new(vec!["div.challenge-wall".to_string()], Box::new(NoopSolver))
            .with_timings(Duration::from_millis(1), Duration::from_millis(1))
    }

    fn orchestrator(
        tmp: &tempfile::TempDir,
        total_pages: u32,
        stop_policy: Box<dyn StopPolicy>,
    ) -> (CrawlOrchestrator, LedgerRepository) {
        let config = CraftConfig {
            base_url: "https://market.example/embroidery/".to_string(),
            total_pages,
            download_root: tmp.path().join("downloads").to_string_lossy().to_string(),
            db_path: tmp.path().join("ledger.db").to_string_lossy().to_string(),
            ..Default::default()
        };
        let ledger = LedgerRepository::new(config.db_path()).unwrap();
        let probe = LedgerRepository::new(config.db_path()).unwrap();
        let orchestrator = CrawlOrchestrator::new(
            config,
            ledger,
            zero_pacing(),
            DownloadAttemptMachine::new(fast_download_config()),
            fast_resolver(),
            stop_policy,
        );
        (orchestrator, probe)
    }

    #[tokio::test]
    async fn cursor_advances_once_per_page() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut orchestrator, probe) = orchestrator(&tmp, 3, Box::new(NeverHalt));
        let mut driver = FakeDriver::new();

        let summary = orchestrator.run(&mut driver).await.unwrap();

        assert_eq!(summary.pages_visited, 3);
        assert!(!summary.halted);
        let cursor = probe.progress("https://market.example/embroidery/", 3).unwrap();
        assert_eq!(cursor.current_page, 4);
        // One navigation per listing page, none per item.
        assert_eq!(driver.navigations().len(), 3);
    }

    #[tokio::test]
    async fn done_items_are_skipped_without_navigation() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut orchestrator, probe) = orchestrator(&tmp, 1, Box::new(NeverHalt));

        let item_url = "https://market.example/product/rose-svg/";
        probe
            .mark(&CrawlRecord::new(item_url, CrawlStatus::Success))
            .unwrap();

        let mut driver = FakeDriver::new()
            .with_present([site::PRODUCT_LINK_SELECTOR])
            .with_attribute(site::PRODUCT_LINK_SELECTOR, "href", "/product/rose-svg/");

        let summary = orchestrator.run(&mut driver).await.unwrap();

        assert_eq!(summary.items_skipped, 1);
        assert_eq!(summary.items_processed, 0);
        assert!(!driver.navigations().iter().any(|u| u == item_url));
        let cursor = probe.progress("https://market.example/embroidery/", 1).unwrap();
        assert_eq!(cursor.current_page, 2);
    }

    #[tokio::test]
    async fn tripped_stop_policy_halts_without_advancing() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut orchestrator, probe) = orchestrator(&tmp, 5, Box::new(AlwaysHalt));

        let mut driver = FakeDriver::new()
            .with_present([site::PRODUCT_LINK_SELECTOR])
            .with_attribute(site::PRODUCT_LINK_SELECTOR, "href", "/product/rose-svg/");

        let summary = orchestrator.run(&mut driver).await.unwrap();

        assert!(summary.halted);
        assert_eq!(summary.pages_visited, 1);
        // The halted page's cursor must not move.
        let cursor = probe.progress("https://market.example/embroidery/", 5).unwrap();
        assert_eq!(cursor.current_page, 1);
    }

    #[tokio::test]
    async fn failed_item_is_recorded_and_crawl_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut orchestrator, probe) = orchestrator(&tmp, 1, Box::new(NeverHalt));

        // The item page has nothing: no titles, no artifacts, no button.
        let mut driver = FakeDriver::new()
            .with_present([site::PRODUCT_LINK_SELECTOR])
            .with_attribute(site::PRODUCT_LINK_SELECTOR, "href", "/product/empty-item/");

        let summary = orchestrator.run(&mut driver).await.unwrap();

        assert_eq!(summary.items_processed, 1);
        let record = probe
            .get("https://market.example/product/empty-item/")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, CrawlStatus::Failed);
        let cursor = probe.progress("https://market.example/embroidery/", 1).unwrap();
        assert_eq!(cursor.current_page, 2);
    }

    #[test]
    fn staleness_policy_compares_against_cutoff() {
        let policy = StalenessPolicy { max_age_days: 30 };
        let fresh = ItemContext {
            url: "https://market.example/product/a".to_string(),
            published: Some(Utc::now() - ChronoDuration::days(5)),
        };
        let stale = ItemContext {
            url: "https://market.example/product/b".to_string(),
            published: Some(Utc::now() - ChronoDuration::days(90)),
        };
        let unknown = ItemContext {
            url: "https://market.example/product/c".to_string(),
            published: None,
        };
        assert!(!policy.should_halt(&fresh));
        assert!(policy.should_halt(&stale));
        assert!(!policy.should_halt(&unknown));
    }

    #[test]
    fn resource_filenames_come_from_the_url_path() {
        assert_eq!(
            resource_filename("https://cdn.example/a/b/rose.png?w=400", "preview.jpg"),
            "rose.png"
        );
        assert_eq!(resource_filename("not a url", "preview.jpg"), "preview.jpg");
        assert_eq!(
            resource_filename("https://cdn.example/", "preview.jpg"),
            "preview.jpg"
        );
    }
}
