//! Shared connection state for both ends of the channel.
//!
//! Server and client differ only in how they obtain a stream; once one is
//! established they run the same session loop: register the write half,
//! announce connectivity, and pump inbound frames until the peer drops or a
//! stop is requested.

use crate::error::IpcError;
use crate::ipc::codec;
use crate::ipc::message::IpcMessage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, warn};

/// Callback invoked for every inbound message, off the read loop.
pub type MessageHandler = Arc<dyn Fn(IpcMessage) + Send + Sync>;

/// Buffered events per subscriber; slow subscribers lose the oldest.
const EVENT_CHANNEL_SIZE: usize = 64;

pub(crate) struct EndpointShared {
    connected: AtomicBool,
    writer: Mutex<Option<OwnedWriteHalf>>,
    messages: broadcast::Sender<IpcMessage>,
    connectivity: broadcast::Sender<bool>,
    handler: StdMutex<Option<MessageHandler>>,
}

impl EndpointShared {
    pub(crate) fn new() -> Arc<Self> {
        let (messages, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (connectivity, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            writer: Mutex::new(None),
            messages,
            connectivity,
            handler: StdMutex::new(None),
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_handler(&self, handler: Option<MessageHandler>) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    pub(crate) fn subscribe_messages(&self) -> broadcast::Receiver<IpcMessage> {
        self.messages.subscribe()
    }

    pub(crate) fn subscribe_connectivity(&self) -> broadcast::Receiver<bool> {
        self.connectivity.subscribe()
    }

    /// Send one frame to the current peer. A write failure is reported to
    /// the caller but does not tear the session down; only the read side
    /// decides when a connection is gone.
    pub(crate) async fn send(&self, message: &IpcMessage) -> Result<(), IpcError> {
        let frame = codec::encode(message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(IpcError::NotConnected)?;
        writer
            .write_all(&frame)
            .await
            .map_err(IpcError::SendFailed)?;
        writer.flush().await.map_err(IpcError::SendFailed)?;
        Ok(())
    }

    pub(crate) fn emit_connectivity(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        let _ = self.connectivity.send(connected);
    }

    pub(crate) async fn drop_writer(&self) {
        self.writer.lock().await.take();
        self.connected.store(false, Ordering::Release);
    }

    fn current_handler(&self) -> Option<MessageHandler> {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Drive one established connection until the peer drops, a frame fails to
/// parse, or a stop is requested.
pub(crate) async fn run_session(
    shared: &Arc<EndpointShared>,
    stream: UnixStream,
    stop: &mut watch::Receiver<bool>,
) {
    let (mut reader, writer) = stream.into_split();
    *shared.writer.lock().await = Some(writer);
    shared.emit_connectivity(true);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            result = codec::read_message(&mut reader) => match result {
                Ok(message) => {
                    debug!(kind = ?message.kind(), sender = %message.sender, "message received");
                    if let Some(handler) = shared.current_handler() {
                        handler(message.clone());
                    }
                    let _ = shared.messages.send(message);
                }
                Err(err) => {
                    debug!(error = %err, "session ended");
                    break;
                }
            },
        }
    }

    shared.writer.lock().await.take();
    shared.emit_connectivity(false);
}

/// Sleep for the reconnect backoff, returning false if a stop request
/// arrives first.
pub(crate) async fn backoff_or_stop(backoff: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(backoff) => !*stop.borrow(),
    }
}

/// Default filesystem location for a named channel endpoint.
pub fn socket_path(channel_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{channel_name}.sock"))
}

pub(crate) fn remove_stale_socket(path: &PathBuf) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "could not remove stale socket");
        }
    }
}
