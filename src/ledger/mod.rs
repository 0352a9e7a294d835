//! Durable crawl ledger: URL dedup records plus pagination cursors.
//!
//! Every mutation opens its own connection and commits before returning,
//! so process termination at any point loses at most the in-flight item.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

/// Error messages longer than this are truncated before storage.
const ERROR_MESSAGE_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Last known outcome of a crawled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Pending,
    Success,
    PartialSuccess,
    Failed,
    Downloaded,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Success => "success",
            CrawlStatus::PartialSuccess => "partial_success",
            CrawlStatus::Failed => "failed",
            CrawlStatus::Downloaded => "downloaded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CrawlStatus::Pending),
            "success" => Some(CrawlStatus::Success),
            "partial_success" => Some(CrawlStatus::PartialSuccess),
            "failed" => Some(CrawlStatus::Failed),
            "downloaded" => Some(CrawlStatus::Downloaded),
            _ => None,
        }
    }

    /// Statuses the orchestrator skips without navigating.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            CrawlStatus::Success | CrawlStatus::PartialSuccess | CrawlStatus::Downloaded
        )
    }
}

/// One row of the URL ledger.
#[derive(Debug, Clone)]
pub struct CrawlRecord {
    pub url: String,
    pub main_title: Option<String>,
    pub detail_title: Option<String>,
    pub download_path: Option<String>,
    pub status: CrawlStatus,
    pub error_message: Option<String>,
    pub crawled_at: String,
}

impl CrawlRecord {
    pub fn new(url: impl Into<String>, status: CrawlStatus) -> Self {
        Self {
            url: url.into(),
            main_title: None,
            detail_title: None,
            download_path: None,
            status,
            error_message: None,
            crawled_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Ledger rollup: row counts per status and the newest crawl timestamp.
#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub total: u64,
    pub by_status: Vec<(String, u64)>,
    pub last_crawled_at: Option<String>,
}

/// Pagination cursor for one listing base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub base_url: String,
    pub current_page: u32,
    pub total_pages: u32,
}

/// SQLite-backed ledger store. Cheap to clone a path around; each call
/// opens a fresh connection with WAL enabled.
pub struct LedgerRepository {
    db_path: PathBuf,
}

impl LedgerRepository {
    pub fn new(db_path: impl AsRef<Path>) -> LedgerResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let repo = Self { db_path };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> LedgerResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;
        Ok(conn)
    }

    fn init_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS crawled_urls (
                url TEXT PRIMARY KEY,
                main_title TEXT,
                detail_title TEXT,
                download_path TEXT,
                status TEXT NOT NULL,
                error_message TEXT,
                crawled_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crawled_urls_status
                ON crawled_urls(status);

            CREATE TABLE IF NOT EXISTS page_progress (
                base_url TEXT PRIMARY KEY,
                current_page INTEGER NOT NULL,
                total_pages INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// True when the URL already carries a done status.
    pub fn is_done(&self, url: &str) -> LedgerResult<bool> {
        Ok(self
            .get(url)?
            .map(|r| r.status.is_done())
            .unwrap_or(false))
    }

    pub fn get(&self, url: &str) -> LedgerResult<Option<CrawlRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT url, main_title, detail_title, download_path, status,
                        error_message, crawled_at
                 FROM crawled_urls WHERE url = ?1",
                params![url],
                |row| {
                    let status: String = row.get(4)?;
                    Ok(CrawlRecord {
                        url: row.get(0)?,
                        main_title: row.get(1)?,
                        detail_title: row.get(2)?,
                        download_path: row.get(3)?,
                        status: CrawlStatus::parse(&status).unwrap_or(CrawlStatus::Pending),
                        error_message: row.get(5)?,
                        crawled_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Upsert the record; the latest write wins for a given URL.
    pub fn mark(&self, record: &CrawlRecord) -> LedgerResult<()> {
        let error_message = record
            .error_message
            .as_deref()
            .map(|m| truncate(m, ERROR_MESSAGE_LIMIT));
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO crawled_urls
                (url, main_title, detail_title, download_path, status,
                 error_message, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.url,
                record.main_title,
                record.detail_title,
                record.download_path,
                record.status.as_str(),
                error_message,
                record.crawled_at,
            ],
        )?;
        debug!("Ledger: {} -> {}", record.url, record.status.as_str());
        Ok(())
    }

    /// Per-status row counts plus the most recent crawl timestamp.
    pub fn stats(&self) -> LedgerResult<LedgerStats> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM crawled_urls GROUP BY status ORDER BY status",
        )?;
        let by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let total = by_status.iter().map(|(_, n)| n).sum();
        let last_crawled_at = conn.query_row(
            "SELECT MAX(crawled_at) FROM crawled_urls",
            [],
            |row| row.get::<_, Option<String>>(0),
        )?;
        Ok(LedgerStats {
            total,
            by_status,
            last_crawled_at,
        })
    }

    /// Fetch the cursor for `base_url`, seeding it at page 1 when absent.
    pub fn progress(&self, base_url: &str, default_total: u32) -> LedgerResult<PageCursor> {
        let conn = self.connect()?;
        let existing = conn
            .query_row(
                "SELECT current_page, total_pages FROM page_progress WHERE base_url = ?1",
                params![base_url],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        match existing {
            Some((current_page, total_pages)) => Ok(PageCursor {
                base_url: base_url.to_string(),
                current_page,
                total_pages,
            }),
            None => {
                conn.execute(
                    "INSERT INTO page_progress (base_url, current_page, total_pages, updated_at)
                     VALUES (?1, 1, ?2, ?3)",
                    params![base_url, default_total, Utc::now().to_rfc3339()],
                )?;
                Ok(PageCursor {
                    base_url: base_url.to_string(),
                    current_page: 1,
                    total_pages: default_total,
                })
            }
        }
    }

    /// Upsert the cursor. Called once per page, after its items are done.
    pub fn update_progress(
        &self,
        base_url: &str,
        current_page: u32,
        total_pages: u32,
    ) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO page_progress
                (base_url, current_page, total_pages, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![base_url, current_page, total_pages, Utc::now().to_rfc3339()],
        )?;
        debug!("Cursor: {} -> page {}/{}", base_url, current_page, total_pages);
        Ok(())
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}
