//! Ingestion pipeline tests using a fake volume layout on disk and a
//! recording channel in place of the socket.

mod common;

use common::RecordingChannel;
use mediaminder::ingest::{IngestSettings, Ingestor, VolumeInfo};
use mediaminder::ipc::{DeviceEventKind, MessageKind, MessagePayload};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(dir: &TempDir, cooldown: Duration) -> IngestSettings {
    IngestSettings {
        volume_label_prefix: "Canon G16".to_string(),
        device_subpath: PathBuf::from("DCIM"),
        holding_dir: dir.path().join("holding"),
        cooldown,
        allowed_extensions: vec![".jpg".to_string(), ".cr2".to_string()],
    }
}

fn camera_volume(dir: &TempDir) -> VolumeInfo {
    VolumeInfo {
        identifier: "E:".to_string(),
        label: Some("CANON G16 CARD".to_string()),
        mount_point: dir.path().join("card"),
    }
}

fn populate_card(dir: &TempDir) {
    let dcim = dir.path().join("card").join("DCIM").join("100CANON");
    std::fs::create_dir_all(&dcim).unwrap();
    std::fs::write(dcim.join("IMG_0001.JPG"), b"one").unwrap();
    std::fs::write(dcim.join("IMG_0002.CR2"), b"two").unwrap();
    std::fs::write(dcim.join("THUMBS.DB"), b"noise").unwrap();
}

fn event_kinds(channel: &RecordingChannel) -> Vec<DeviceEventKind> {
    channel
        .sent()
        .into_iter()
        .filter_map(|message| match message.payload {
            MessagePayload::DeviceEvent(event) => Some(event.event_kind),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn attach_downloads_media_and_announces_it() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    populate_card(&dir);
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());

    ingestor.on_device_attached(&camera_volume(&dir)).await;

    assert_eq!(
        event_kinds(&channel),
        [
            DeviceEventKind::DeviceInserted,
            DeviceEventKind::DownloadStarted,
            DeviceEventKind::DownloadCompleted,
        ]
    );
    let sent = channel.sent();
    let announce = sent
        .iter()
        .find(|m| m.kind() == MessageKind::NewMediaAvailable)
        .expect("new media announcement");
    assert!(matches!(
        announce.payload,
        MessagePayload::NewMediaAvailable { count: 2 }
    ));

    let holding = dir.path().join("holding");
    assert!(holding.join("IMG_0001.JPG").is_file());
    assert!(holding.join("IMG_0002.CR2").is_file());
    assert!(!holding.join("THUMBS.DB").exists());
}

#[tokio::test]
async fn non_matching_label_is_ignored() {
    let dir = TempDir::new().unwrap();
    populate_card(&dir);
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());

    let mut volume = camera_volume(&dir);
    volume.label = Some("USB DRIVE".to_string());
    ingestor.on_device_attached(&volume).await;
    volume.label = None;
    ingestor.on_device_attached(&volume).await;

    assert!(channel.sent().is_empty());
    assert!(!dir.path().join("holding").exists());
}

#[tokio::test]
async fn cooldown_drops_an_immediate_reattach() {
    let dir = TempDir::new().unwrap();
    populate_card(&dir);
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());
    let volume = camera_volume(&dir);

    ingestor.on_device_attached(&volume).await;
    ingestor.on_device_attached(&volume).await;

    let starts = event_kinds(&channel)
        .into_iter()
        .filter(|kind| *kind == DeviceEventKind::DownloadStarted)
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn expired_cooldown_admits_a_second_download() {
    let dir = TempDir::new().unwrap();
    populate_card(&dir);
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_millis(200)), channel.clone());
    let volume = camera_volume(&dir);

    ingestor.on_device_attached(&volume).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    ingestor.on_device_attached(&volume).await;

    let starts = event_kinds(&channel)
        .into_iter()
        .filter(|kind| *kind == DeviceEventKind::DownloadStarted)
        .count();
    assert_eq!(starts, 2);
}

#[tokio::test]
async fn missing_device_subpath_reports_failure() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("card")).unwrap();
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());

    ingestor.on_device_attached(&camera_volume(&dir)).await;

    let kinds = event_kinds(&channel);
    assert_eq!(kinds.last(), Some(&DeviceEventKind::DownloadFailed));
    let sent = channel.sent();
    let failed = sent
        .iter()
        .find_map(|message| match &message.payload {
            MessagePayload::DeviceEvent(event)
                if event.event_kind == DeviceEventKind::DownloadFailed =>
            {
                Some(event.clone())
            }
            _ => None,
        })
        .expect("failure event");
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn failed_download_does_not_start_the_cooldown() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("card")).unwrap();
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());
    let volume = camera_volume(&dir);

    ingestor.on_device_attached(&volume).await;
    populate_card(&dir);
    ingestor.on_device_attached(&volume).await;

    let kinds = event_kinds(&channel);
    assert!(kinds.contains(&DeviceEventKind::DownloadFailed));
    assert!(kinds.contains(&DeviceEventKind::DownloadCompleted));
}

#[tokio::test]
async fn name_collision_keeps_the_existing_file() {
    let dir = TempDir::new().unwrap();
    populate_card(&dir);
    let holding = dir.path().join("holding");
    std::fs::create_dir_all(&holding).unwrap();
    std::fs::write(holding.join("IMG_0001.JPG"), b"already here").unwrap();

    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());
    ingestor.on_device_attached(&camera_volume(&dir)).await;

    assert_eq!(
        std::fs::read(holding.join("IMG_0001.JPG")).unwrap(),
        b"already here"
    );
    let renamed: Vec<_> = std::fs::read_dir(&holding)
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("IMG_0001_") && name.ends_with(".JPG"))
        .collect();
    assert_eq!(renamed.len(), 1);
}

#[tokio::test]
async fn detach_announces_removal_for_matching_volumes_only() {
    let dir = TempDir::new().unwrap();
    let channel = Arc::new(RecordingChannel::new());
    let ingestor = Ingestor::new(settings(&dir, Duration::from_secs(30)), channel.clone());

    let mut volume = camera_volume(&dir);
    ingestor.on_device_removed(&volume).await;
    volume.label = Some("USB DRIVE".to_string());
    ingestor.on_device_removed(&volume).await;

    assert_eq!(event_kinds(&channel), [DeviceEventKind::DeviceRemoved]);
}
