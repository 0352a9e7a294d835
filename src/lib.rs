//! craftacquire - bulk design-asset acquisition from marketplace catalogs.
//!
//! Walks a paginated listing with a real browser, paces every action to
//! look like one human operator, clears verification interstitials, and
//! pulls each item's preview image, PDF, and archive into a local tree
//! while a SQLite ledger tracks what is already done.

pub mod browser;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod download;
pub mod ledger;
pub mod orchestrator;
pub mod pacing;
pub mod site;
pub mod storage;

#[cfg(test)]
mod testutil;
