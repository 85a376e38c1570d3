//! Device-triggered ingestion: when a matching volume appears, copy its
//! media into the holding directory and announce progress over the channel.

use crate::error::IngestError;
use crate::ipc::{Channel, DeviceEvent, DeviceEventKind, IpcMessage, MessagePayload};
use crate::media::extension_allowed;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SENDER: &str = "camera-service";

/// A removable volume as reported by the platform layer.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    /// Platform identifier for the drive (e.g. "E:" or "/dev/sdb1").
    pub identifier: String,
    /// Volume label, if the filesystem carries one.
    pub label: Option<String>,
    /// Where the volume's filesystem is reachable.
    pub mount_point: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Volumes whose label starts with this (case-insensitive) trigger a
    /// download.
    pub volume_label_prefix: String,
    /// Subdirectory on the volume holding the media (typically "DCIM").
    pub device_subpath: PathBuf,
    pub holding_dir: PathBuf,
    /// Re-insertions within this window after a completed download are
    /// ignored.
    pub cooldown: Duration,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub copied: u64,
    pub skipped: u64,
}

struct GateState {
    last_completed: Option<Instant>,
}

pub struct Ingestor {
    settings: IngestSettings,
    channel: Arc<dyn Channel>,
    gate: Mutex<GateState>,
}

impl Ingestor {
    pub fn new(settings: IngestSettings, channel: Arc<dyn Channel>) -> Self {
        Self {
            settings,
            channel,
            gate: Mutex::new(GateState {
                last_completed: None,
            }),
        }
    }

    /// React to a volume attach notification. Non-matching volumes are
    /// ignored; a matching one triggers at most one download at a time.
    pub async fn on_device_attached(&self, volume: &VolumeInfo) {
        if !self.label_matches(volume) {
            debug!(identifier = %volume.identifier, "volume ignored");
            return;
        }
        info!(identifier = %volume.identifier, label = ?volume.label, "camera volume attached");
        self.emit(MessagePayload::DeviceEvent(DeviceEvent {
            event_kind: DeviceEventKind::DeviceInserted,
            drive_identifier: volume.identifier.clone(),
            count: None,
            error: None,
        }))
        .await;

        // One download at a time; a signal arriving mid-download is dropped.
        let Ok(mut gate) = self.gate.try_lock() else {
            warn!(identifier = %volume.identifier, "download already in progress, signal dropped");
            return;
        };
        if let Some(last) = gate.last_completed {
            if last.elapsed() < self.settings.cooldown {
                info!(identifier = %volume.identifier, "within cooldown, signal dropped");
                return;
            }
        }

        match self.download_batch(volume).await {
            Ok(report) => {
                gate.last_completed = Some(Instant::now());
                info!(copied = report.copied, skipped = report.skipped, "download complete");
                self.emit(MessagePayload::DeviceEvent(DeviceEvent {
                    event_kind: DeviceEventKind::DownloadCompleted,
                    drive_identifier: volume.identifier.clone(),
                    count: Some(report.copied),
                    error: None,
                }))
                .await;
                if report.copied > 0 {
                    self.emit(MessagePayload::NewMediaAvailable {
                        count: report.copied,
                    })
                    .await;
                }
            }
            Err(err) => {
                warn!(identifier = %volume.identifier, error = %err, "download failed");
                self.emit(MessagePayload::DeviceEvent(DeviceEvent {
                    event_kind: DeviceEventKind::DownloadFailed,
                    drive_identifier: volume.identifier.clone(),
                    count: None,
                    error: Some(err.to_string()),
                }))
                .await;
            }
        }
    }

    pub async fn on_device_removed(&self, volume: &VolumeInfo) {
        if !self.label_matches(volume) {
            return;
        }
        info!(identifier = %volume.identifier, "camera volume removed");
        self.emit(MessagePayload::DeviceEvent(DeviceEvent {
            event_kind: DeviceEventKind::DeviceRemoved,
            drive_identifier: volume.identifier.clone(),
            count: None,
            error: None,
        }))
        .await;
    }

    fn label_matches(&self, volume: &VolumeInfo) -> bool {
        let Some(label) = &volume.label else {
            return false;
        };
        label
            .to_lowercase()
            .starts_with(&self.settings.volume_label_prefix.to_lowercase())
    }

    async fn download_batch(&self, volume: &VolumeInfo) -> Result<BatchReport, IngestError> {
        self.emit(MessagePayload::DeviceEvent(DeviceEvent {
            event_kind: DeviceEventKind::DownloadStarted,
            drive_identifier: volume.identifier.clone(),
            count: None,
            error: None,
        }))
        .await;

        let source = volume.mount_point.join(&self.settings.device_subpath);
        if !source.is_dir() {
            return Err(IngestError::SourceMissing(source));
        }
        tokio::fs::create_dir_all(&self.settings.holding_dir).await?;

        let extensions = self.settings.allowed_extensions.clone();
        let scan_root = source.clone();
        let files = tokio::task::spawn_blocking(move || enumerate_media(&scan_root, &extensions))
            .await??;
        info!(count = files.len(), source = %source.display(), "media enumerated");

        // Large RAW and video copies must not stall the runtime.
        let holding_dir = self.settings.holding_dir.clone();
        let report = tokio::task::spawn_blocking(move || {
            let mut report = BatchReport::default();
            for file in files {
                match copy_one(&file, &holding_dir) {
                    Ok(dest) => {
                        debug!(from = %file.display(), to = %dest.display(), "copied");
                        report.copied += 1;
                    }
                    Err(err) => {
                        // A bad sector on one file must not abort the batch.
                        warn!(path = %file.display(), error = %err, "copy failed, file skipped");
                        report.skipped += 1;
                    }
                }
            }
            report
        })
        .await?;
        Ok(report)
    }

    async fn emit(&self, payload: MessagePayload) {
        let message = IpcMessage::new(payload, SENDER);
        if let Err(err) = self.channel.send(&message).await {
            warn!(kind = ?message.kind(), error = %err, "viewer unreachable, message dropped");
        }
    }
}

/// Walk the device directory recursively and collect allowed media files.
fn enumerate_media(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| IngestError::Enumerate {
            path: root.to_path_buf(),
            source: err,
        })?;
        if entry.file_type().is_file() && extension_allowed(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy one file into the holding directory, renaming on collision so an
/// existing file is never overwritten.
fn copy_one(source: &Path, holding_dir: &Path) -> std::io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let mut dest = holding_dir.join(file_name);
    if dest.exists() {
        dest = timestamped_destination(holding_dir, source);
    }
    std::fs::copy(source, &dest)?;
    Ok(dest)
}

/// `IMG_0001.JPG` colliding becomes `IMG_0001_20240301_101500.JPG`; if that
/// also exists, a numeric suffix disambiguates within the same second.
fn timestamped_destination(holding_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut dest = holding_dir.join(format!("{stem}_{stamp}{ext}"));
    let mut counter = 1u32;
    while dest.exists() {
        dest = holding_dir.join(format!("{stem}_{stamp}_{counter}{ext}"));
        counter += 1;
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("100CANON");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("IMG_0001.JPG"), b"a").unwrap();
        std::fs::write(dir.path().join("IMG_0002.jpg"), b"b").unwrap();
        std::fs::write(dir.path().join("index.dat"), b"c").unwrap();

        let files = enumerate_media(dir.path(), &[".jpg".to_string()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["IMG_0001.JPG", "IMG_0002.jpg"]);
    }

    #[test]
    fn collision_gets_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("card");
        let holding = dir.path().join("holding");
        std::fs::create_dir_all(&source_dir).unwrap();
        std::fs::create_dir_all(&holding).unwrap();
        let source = source_dir.join("IMG_0001.JPG");
        std::fs::write(&source, b"new bytes").unwrap();
        std::fs::write(holding.join("IMG_0001.JPG"), b"old").unwrap();

        let dest = copy_one(&source, &holding).unwrap();
        let name = dest.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("IMG_0001_"));
        assert!(name.ends_with(".JPG"));
        assert_eq!(std::fs::read(holding.join("IMG_0001.JPG")).unwrap(), b"old");
        assert_eq!(std::fs::read(&dest).unwrap(), b"new bytes");
    }
}
