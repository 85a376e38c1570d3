//! Listening end of the channel: binds the socket, accepts one peer at a
//! time, and rebinds after the peer drops.

use crate::error::IpcError;
use crate::ipc::endpoint::{
    backoff_or_stop, remove_stale_socket, run_session, socket_path, EndpointShared, MessageHandler,
};
use crate::ipc::message::IpcMessage;
use crate::ipc::Channel;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct PipeServer {
    path: PathBuf,
    backoff: Duration,
    shared: Arc<EndpointShared>,
    stop_tx: StdMutex<Option<watch::Sender<bool>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl PipeServer {
    pub fn new(channel_name: &str, backoff: Duration) -> Self {
        Self::with_path(socket_path(channel_name), backoff)
    }

    /// Bind to an explicit socket path instead of the default location.
    pub fn with_path(path: PathBuf, backoff: Duration) -> Self {
        Self {
            path,
            backoff,
            shared: EndpointShared::new(),
            stop_tx: StdMutex::new(None),
            task: StdMutex::new(None),
        }
    }

    async fn accept_loop(
        shared: Arc<EndpointShared>,
        path: PathBuf,
        backoff: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        while !*stop.borrow() {
            remove_stale_socket(&path);
            let listener = match UnixListener::bind(&path) {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "bind failed, retrying");
                    if !backoff_or_stop(backoff, &mut stop).await {
                        break;
                    }
                    continue;
                }
            };
            info!(path = %path.display(), "waiting for peer");

            let accepted = tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    // One peer at a time; release the socket while serving it.
                    drop(listener);
                    info!("peer connected");
                    run_session(&shared, stream, &mut stop).await;
                    info!("peer disconnected");
                }
                Err(err) => {
                    warn!(error = %err, "accept failed, retrying");
                    if !backoff_or_stop(backoff, &mut stop).await {
                        break;
                    }
                }
            }
        }

        shared.drop_writer().await;
        remove_stale_socket(&path);
    }
}

#[async_trait]
impl Channel for PipeServer {
    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    async fn send(&self, message: &IpcMessage) -> Result<(), IpcError> {
        self.shared.send(message).await
    }

    fn start_listening(&self, handler: Option<MessageHandler>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("server already listening");
            return;
        }

        self.shared.set_handler(handler);
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);
        *task = Some(tokio::spawn(Self::accept_loop(
            Arc::clone(&self.shared),
            self.path.clone(),
            self.backoff,
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
