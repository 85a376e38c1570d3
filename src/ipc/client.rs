//! Dialing end of the channel: connects with a timeout and retries on a
//! fixed backoff until stopped, reconnecting whenever the session drops.

use crate::error::IpcError;
use crate::ipc::endpoint::{
    backoff_or_stop, run_session, socket_path, EndpointShared, MessageHandler,
};
use crate::ipc::message::IpcMessage;
use crate::ipc::Channel;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PipeClient {
    path: PathBuf,
    backoff: Duration,
    connect_timeout: Duration,
    shared: Arc<EndpointShared>,
    stop_tx: StdMutex<Option<watch::Sender<bool>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl PipeClient {
    pub fn new(channel_name: &str, backoff: Duration, connect_timeout: Duration) -> Self {
        Self::with_path(socket_path(channel_name), backoff, connect_timeout)
    }

    /// Dial an explicit socket path instead of the default location.
    pub fn with_path(path: PathBuf, backoff: Duration, connect_timeout: Duration) -> Self {
        Self {
            path,
            backoff,
            connect_timeout,
            shared: EndpointShared::new(),
            stop_tx: StdMutex::new(None),
            task: StdMutex::new(None),
        }
    }

    async fn dial_loop(
        shared: Arc<EndpointShared>,
        path: PathBuf,
        backoff: Duration,
        connect_timeout: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        while !*stop.borrow() {
            let attempt = tokio::select! {
                _ = stop.changed() => break,
                attempt = tokio::time::timeout(connect_timeout, UnixStream::connect(&path)) => attempt,
            };
            match attempt {
                Ok(Ok(stream)) => {
                    info!(path = %path.display(), "connected");
                    run_session(&shared, stream, &mut stop).await;
                    info!("disconnected");
                }
                Ok(Err(err)) => {
                    debug!(path = %path.display(), error = %err, "connect failed");
                    shared.emit_connectivity(false);
                }
                Err(_) => {
                    warn!(path = %path.display(), "connect timed out");
                    shared.emit_connectivity(false);
                }
            }
            if !backoff_or_stop(backoff, &mut stop).await {
                break;
            }
        }

        shared.drop_writer().await;
    }
}

#[async_trait]
impl Channel for PipeClient {
    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    async fn send(&self, message: &IpcMessage) -> Result<(), IpcError> {
        self.shared.send(message).await
    }

    fn start_listening(&self, handler: Option<MessageHandler>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("client already running");
            return;
        }

        self.shared.set_handler(handler);
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);
        *task = Some(tokio::spawn(Self::dial_loop(
            Arc::clone(&self.shared),
            self.path.clone(),
            self.backoff,
            self.connect_timeout,
            stop_rx,
        )));
    }

    async fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
        }
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.drop_writer().await;
    }

    fn messages(&self) -> broadcast::Receiver<IpcMessage> {
        self.shared.subscribe_messages()
    }

    fn connectivity(&self) -> broadcast::Receiver<bool> {
        self.shared.subscribe_connectivity()
    }
}
