//! Filesystem plumbing: item directories, archive extraction, backups.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};

/// Maximum filename length to keep paths portable.
const MAX_FILENAME_LEN: usize = 100;

/// Sanitize a string for use as a file or directory name.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_');
    let capped: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    capped.trim_end().to_string()
}

/// Directory for one item's artifacts under `root`, named from its
/// titles. Falls back to a timestamped name when both titles are blank.
pub fn item_directory(root: &Path, main_title: &str, detail_title: &str) -> PathBuf {
    let main = sanitize_filename(main_title);
    let detail = sanitize_filename(detail_title);

    let name = match (main.is_empty(), detail.is_empty()) {
        (false, false) if main != detail => format!("{}_{}", main, detail),
        (false, _) => main,
        (true, false) => detail,
        (true, true) => format!("untitled_{}", Local::now().format("%Y%m%d_%H%M%S")),
    };

    root.join(sanitize_filename(&name))
}

/// Extract `archive` into a sibling directory named after its stem and
/// delete the archive on success. Returns the extraction directory.
pub fn extract_archive(archive: &Path) -> Result<PathBuf> {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Archive has no usable file name")?;
    let dest = archive
        .parent()
        .context("Archive has no parent directory")?
        .join(stem);

    fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a readable archive", archive.display()))?;
    let entries = zip.len();
    zip.extract(&dest)
        .with_context(|| format!("Failed to extract {}", archive.display()))?;

    fs::remove_file(archive)
        .with_context(|| format!("Failed to remove {}", archive.display()))?;

    info!("Extracted {} entries to {}", entries, dest.display());
    Ok(dest)
}

/// Mirror `source` (a directory under `download_root`) into the same
/// relative location under `backup_root`, replacing any stale copy.
/// Sources outside the download root are skipped.
pub fn backup_tree(
    source: &Path,
    download_root: &Path,
    backup_root: &Path,
) -> Result<Option<PathBuf>> {
    let relative = match source.strip_prefix(download_root) {
        Ok(rel) => rel,
        Err(_) => {
            warn!(
                "Skipping backup of {}: outside {}",
                source.display(),
                download_root.display()
            );
            return Ok(None);
        }
    };

    let dest = backup_root.join(relative);
    if dest.exists() {
        fs::remove_dir_all(&dest)
            .with_context(|| format!("Failed to clear stale backup {}", dest.display()))?;
    }
    copy_dir(source, &dest)?;
    debug!("Backed up {} to {}", source.display(), dest.display());
    Ok(Some(dest))
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    for entry in
        fs::read_dir(source).with_context(|| format!("Failed to read {}", source.display()))?
    {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy to {}", target.display()))?;
        }
    }
    Ok(())
}
