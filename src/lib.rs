//! Core of a two-process camera ingestion system.
//!
//! A background capture service watches for a camera card being attached,
//! copies its media into a local holding directory, and keeps dated backup
//! snapshots of that directory. A separate viewer process is kept informed
//! over a framed local channel; either side can come and go, and the other
//! reconnects on a fixed backoff.

pub mod config;
pub mod error;
pub mod ingest;
pub mod ipc;
pub mod media;
pub mod retention;
pub mod watch;

pub use config::Settings;
pub use error::{ConfigError, FramingError, IngestError, IpcError, RetentionError, WatchError};
pub use ingest::{IngestSettings, Ingestor, VolumeInfo};
pub use ipc::{
    Channel, DeviceEvent, DeviceEventKind, IpcMessage, MessageKind, MessagePayload, PipeClient,
    PipeServer,
};
pub use media::{scan_media_dir, MediaItem};
pub use retention::{run_cycle, CycleReport, RetentionConfig};
pub use watch::{MediaItemHandler, MediaWatcher};
