//! Backup retention over the holding directory: snapshot the loose media
//! into a dated subdirectory, verify every copy, delete the originals, and
//! expire snapshots past their retention window.

use crate::error::RetentionError;
use crate::media::extension_allowed;
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const SNAPSHOT_PREFIX: &str = "Backup_";
const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// How many numbered copies (`name_1` .. `name_N`) verification will
/// consider before declaring a backup missing.
const VERIFY_SUFFIX_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub holding_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    /// Snapshots older than this are removed.
    pub retention: Duration,
}

/// What one cycle did, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub snapshot: Option<PathBuf>,
    pub backed_up: u64,
    pub copy_failures: u64,
    pub deleted: u64,
    pub delete_failures: u64,
    pub expired: u64,
}

/// Run one full cycle: backup, verify, delete, expire. Expiry always runs,
/// even when the backup phase fails, so old snapshots cannot pile up behind
/// a persistent verification problem.
pub fn run_cycle(config: &RetentionConfig) -> Result<CycleReport, RetentionError> {
    let mut report = CycleReport::default();
    if !config.holding_dir.is_dir() {
        debug!(dir = %config.holding_dir.display(), "holding directory absent, nothing to do");
        return Ok(report);
    }

    let backup_result = backup_phase(config, &mut report);
    report.expired = expire_old_snapshots(config, report.snapshot.as_deref());
    backup_result.map(|_| report)
}

fn backup_phase(config: &RetentionConfig, report: &mut CycleReport) -> Result<(), RetentionError> {
    let originals = loose_media_files(config)?;
    if originals.is_empty() {
        debug!("no loose media, backup skipped");
        return Ok(());
    }

    let snapshot = create_snapshot_dir(&config.holding_dir)?;
    info!(snapshot = %snapshot.display(), count = originals.len(), "backing up");
    for original in &originals {
        match copy_into_snapshot(original, &snapshot) {
            Ok(_) => report.backed_up += 1,
            Err(err) => {
                warn!(path = %original.display(), error = %err, "backup copy failed");
                report.copy_failures += 1;
            }
        }
    }
    report.snapshot = Some(snapshot.clone());

    let failures = verify_snapshot(&originals, &snapshot);
    if !failures.is_empty() {
        // Originals stay in place until every copy checks out.
        warn!(snapshot = %snapshot.display(), failures = failures.len(), "verification failed, originals retained");
        return Err(RetentionError::VerificationFailed {
            snapshot,
            failures,
        });
    }

    for original in &originals {
        match std::fs::remove_file(original) {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                // A still-writing device driver may hold the handle; the
                // next cycle will pick the file up again.
                warn!(path = %original.display(), error = %err, "delete failed, file left in place");
                report.delete_failures += 1;
            }
        }
    }
    Ok(())
}

/// Media files directly inside the holding directory; snapshots and other
/// subdirectories are never descended into.
fn loose_media_files(config: &RetentionConfig) -> Result<Vec<PathBuf>, RetentionError> {
    let entries =
        std::fs::read_dir(&config.holding_dir).map_err(|err| RetentionError::Enumerate {
            path: config.holding_dir.clone(),
            source: err,
        })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| RetentionError::Enumerate {
            path: config.holding_dir.clone(),
            source: err,
        })?;
        let path = entry.path();
        if path.is_file() && extension_allowed(&path, &config.allowed_extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn create_snapshot_dir(holding_dir: &Path) -> Result<PathBuf, RetentionError> {
    let stamp = Local::now().format(SNAPSHOT_TIME_FORMAT);
    let base = holding_dir.join(format!("{SNAPSHOT_PREFIX}{stamp}"));
    let mut candidate = base.clone();
    let mut counter = 1u32;
    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = PathBuf::from(format!("{}_{counter}", base.display()));
                counter += 1;
            }
            Err(err) => {
                return Err(RetentionError::CreateSnapshot {
                    path: candidate,
                    source: err,
                })
            }
        }
    }
}

/// Copy an original into the snapshot, numbering the name on collision
/// starting from `_1`.
fn copy_into_snapshot(original: &Path, snapshot: &Path) -> std::io::Result<PathBuf> {
    let file_name = original
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let mut dest = snapshot.join(file_name);
    let mut counter = 1u32;
    while dest.exists() {
        dest = snapshot.join(numbered_name(original, counter));
        counter += 1;
    }
    std::fs::copy(original, &dest)?;
    Ok(dest)
}

fn numbered_name(original: &Path, counter: u32) -> String {
    let stem = original
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    format!("{stem}_{counter}{ext}")
}

/// Check that every original's copy in the snapshot has an identical byte
/// length. The copy is the first candidate that exists (direct name, then
/// numbered variants in order); a wrong-sized copy there fails the original
/// even if a later candidate would match. Returns a description per
/// original that failed.
fn verify_snapshot(originals: &[PathBuf], snapshot: &Path) -> Vec<String> {
    let mut failures = Vec::new();
    for original in originals {
        let Ok(metadata) = std::fs::metadata(original) else {
            failures.push(format!("{}: original unreadable", original.display()));
            continue;
        };
        match find_backup_copy(original, snapshot) {
            Some(copy) if file_has_size(&copy, metadata.len()) => {}
            Some(copy) => failures.push(format!(
                "{}: backup copy {} has the wrong size",
                original.display(),
                copy.display()
            )),
            None => failures.push(format!("{}: no backup copy", original.display())),
        }
    }
    failures
}

/// First existing candidate for an original's copy.
fn find_backup_copy(original: &Path, snapshot: &Path) -> Option<PathBuf> {
    let direct = original
        .file_name()
        .map(|name| snapshot.join(name))?;
    if direct.exists() {
        return Some(direct);
    }
    (1..=VERIFY_SUFFIX_LIMIT)
        .map(|counter| snapshot.join(numbered_name(original, counter)))
        .find(|candidate| candidate.exists())
}

fn file_has_size(path: &Path, expected: u64) -> bool {
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() == expected)
        .unwrap_or(false)
}

/// Remove snapshot subdirectories older than the retention window. Removal
/// failures are logged and skipped.
fn expire_old_snapshots(config: &RetentionConfig, current_snapshot: Option<&Path>) -> u64 {
    let Ok(retention) = chrono::Duration::from_std(config.retention) else {
        warn!("retention window out of range, expiry skipped");
        return 0;
    };
    let cutoff = Local::now().naive_local() - retention;

    let Ok(entries) = std::fs::read_dir(&config.holding_dir) else {
        return 0;
    };
    let mut expired = 0u64;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if current_snapshot.is_some_and(|snapshot| snapshot == path) {
            continue;
        }
        let Some(created) = snapshot_created_at(&path) else {
            continue;
        };
        if created < cutoff {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(snapshot = %path.display(), "expired snapshot removed");
                    expired += 1;
                }
                Err(err) => {
                    warn!(snapshot = %path.display(), error = %err, "could not remove expired snapshot");
                }
            }
        }
    }
    expired
}

/// A snapshot's age comes from its own name; directories that do not carry
/// the dated name fall back to filesystem timestamps.
fn snapshot_created_at(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_string_lossy();
    if let Some(stamp) = name.strip_prefix(SNAPSHOT_PREFIX) {
        // Tolerate a collision suffix after the timestamp.
        let stamp = stamp.get(..15).unwrap_or(stamp);
        if let Ok(parsed) = NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT) {
            return Some(parsed);
        }
    }
    let metadata = std::fs::metadata(path).ok()?;
    let time = metadata.created().or_else(|_| metadata.modified()).ok()?;
    let local: chrono::DateTime<Local> = time.into();
    Some(local.naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_names_count_up_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("Backup_20240301_100000");
        std::fs::create_dir(&snapshot).unwrap();
        let original = dir.path().join("IMG_0001.JPG");
        std::fs::write(&original, b"data").unwrap();

        let first = copy_into_snapshot(&original, &snapshot).unwrap();
        let second = copy_into_snapshot(&original, &snapshot).unwrap();
        let third = copy_into_snapshot(&original, &snapshot).unwrap();
        assert_eq!(first.file_name().unwrap(), "IMG_0001.JPG");
        assert_eq!(second.file_name().unwrap(), "IMG_0001_1.JPG");
        assert_eq!(third.file_name().unwrap(), "IMG_0001_2.JPG");
    }

    #[test]
    fn verify_detects_truncated_and_missing_copies() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("Backup_20240301_100000");
        std::fs::create_dir(&snapshot).unwrap();
        let good = dir.path().join("good.jpg");
        let truncated = dir.path().join("truncated.jpg");
        let missing = dir.path().join("missing.jpg");
        std::fs::write(&good, b"full contents").unwrap();
        std::fs::write(&truncated, b"full contents").unwrap();
        std::fs::write(&missing, b"full contents").unwrap();
        std::fs::write(snapshot.join("good.jpg"), b"full contents").unwrap();
        std::fs::write(snapshot.join("truncated.jpg"), b"full").unwrap();

        let failures = verify_snapshot(
            &[good, truncated.clone(), missing.clone()],
            &snapshot,
        );
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("truncated.jpg"));
        assert!(failures[1].contains("missing.jpg"));
    }

    #[test]
    fn verify_accepts_a_numbered_copy_when_no_direct_name_exists() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("Backup_20240301_100000");
        std::fs::create_dir(&snapshot).unwrap();
        let original = dir.path().join("IMG_0001.JPG");
        std::fs::write(&original, b"payload").unwrap();
        std::fs::write(snapshot.join("IMG_0001_1.JPG"), b"payload").unwrap();

        assert!(verify_snapshot(&[original], &snapshot).is_empty());
    }

    #[test]
    fn verify_fails_on_a_wrong_sized_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("Backup_20240301_100000");
        std::fs::create_dir(&snapshot).unwrap();
        let original = dir.path().join("IMG_0001.JPG");
        std::fs::write(&original, b"payload").unwrap();
        // The direct name exists but is damaged; a later numbered candidate
        // matching the size must not rescue it.
        std::fs::write(snapshot.join("IMG_0001.JPG"), b"other sized file").unwrap();
        std::fs::write(snapshot.join("IMG_0001_1.JPG"), b"payload").unwrap();

        let failures = verify_snapshot(&[original], &snapshot);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("wrong size"));
    }

    #[test]
    fn snapshot_age_comes_from_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Backup_20240301_101530");
        std::fs::create_dir(&path).unwrap();
        let created = snapshot_created_at(&path).unwrap();
        assert_eq!(
            created,
            NaiveDateTime::parse_from_str("20240301_101530", SNAPSHOT_TIME_FORMAT).unwrap()
        );

        let suffixed = dir.path().join("Backup_20240301_101530_1");
        std::fs::create_dir(&suffixed).unwrap();
        assert_eq!(snapshot_created_at(&suffixed).unwrap(), created);
    }
}
