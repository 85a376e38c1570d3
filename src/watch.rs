//! Holding-directory watcher: announces media files as they land, after a
//! settle delay so half-written files are not reported.

use crate::ipc::{Channel, IpcMessage, MessagePayload};
use crate::media::{extension_allowed, MediaItem};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

const SENDER: &str = "media-watcher";

/// Callback invoked with each settled media item.
pub type MediaItemHandler = Arc<dyn Fn(MediaItem) + Send + Sync>;

pub struct MediaWatcher {
    // Held so the notify backend keeps running; dropped on stop.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl MediaWatcher {
    /// Watch `dir` for new media and announce each settled file over the
    /// channel (and to `on_item`, when given).
    pub fn start(
        dir: &Path,
        extensions: Vec<String>,
        settle_delay: Duration,
        channel: Arc<dyn Channel>,
        on_item: Option<MediaItemHandler>,
    ) -> Result<Self, crate::error::WatchError> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher =
            notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
                match event {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            for path in event.paths {
                                let _ = tx.send(path);
                            }
                        }
                    }
                    Err(err) => warn!(error = %err, "watch event error"),
                }
            })
            .map_err(|err| crate::error::WatchError::Watcher {
                path: dir.to_path_buf(),
                source: err,
            })?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| crate::error::WatchError::Watcher {
                path: dir.to_path_buf(),
                source: err,
            })?;

        let task = tokio::spawn(announce_loop(
            rx,
            extensions,
            settle_delay,
            channel,
            on_item,
        ));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub async fn stop(self) {
        drop(self._watcher);
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn announce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    extensions: Vec<String>,
    settle_delay: Duration,
    channel: Arc<dyn Channel>,
    on_item: Option<MediaItemHandler>,
) {
    // Paths currently waiting out their settle delay; the follow-up modify
    // events for a file being written land here and are collapsed. Entries
    // leave the set once the file settles, so a later file reusing the same
    // name is announced again.
    let pending: Arc<StdMutex<HashSet<PathBuf>>> = Arc::default();
    let mut settling = JoinSet::new();
    loop {
        tokio::select! {
            maybe_path = rx.recv() => {
                let Some(path) = maybe_path else { break };
                if !extension_allowed(&path, &extensions) {
                    continue;
                }
                if !pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(path.clone())
                {
                    continue;
                }
                settling.spawn(announce_one(
                    path,
                    settle_delay,
                    Arc::clone(&pending),
                    Arc::clone(&channel),
                    on_item.clone(),
                ));
            }
            Some(_) = settling.join_next(), if !settling.is_empty() => {}
        }
    }
}

/// Wait out the settle delay for one path, then announce it. Each file
/// settles on its own timer so a burst of ingested files is not serialized.
async fn announce_one(
    path: PathBuf,
    settle_delay: Duration,
    pending: Arc<StdMutex<HashSet<PathBuf>>>,
    channel: Arc<dyn Channel>,
    on_item: Option<MediaItemHandler>,
) {
    // Let the writer finish before reading metadata.
    tokio::time::sleep(settle_delay).await;
    let item = MediaItem::from_path(&path, SENDER, true);
    pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&path);

    let item = match item {
        Ok(item) if item.size > 0 => item,
        Ok(_) => {
            debug!(path = %path.display(), "empty file ignored");
            return;
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "file gone before settle");
            return;
        }
    };

    debug!(file = %item.file_name, "new media settled");
    if let Some(handler) = &on_item {
        handler(item.clone());
    }
    let message = IpcMessage::new(MessagePayload::NewMediaAvailable { count: 1 }, SENDER);
    if let Err(err) = channel.send(&message).await {
        warn!(error = %err, "viewer unreachable, announcement dropped");
    }
}
