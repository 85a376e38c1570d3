#![allow(dead_code)]

use async_trait::async_trait;
use mediaminder::error::IpcError;
use mediaminder::ipc::{Channel, IpcMessage, MessageHandler};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Route tracing output through the test harness; safe to call from every
/// test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Channel double that records every outbound message instead of framing it
/// onto a socket.
pub struct RecordingChannel {
    sent: Mutex<Vec<IpcMessage>>,
    messages: broadcast::Sender<IpcMessage>,
    connectivity: broadcast::Sender<bool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(64);
        let (connectivity, _) = broadcast::channel(64);
        Self {
            sent: Mutex::new(Vec::new()),
            messages,
            connectivity,
        }
    }

    pub fn sent(&self) -> Vec<IpcMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn is_connected(&self) -> bool {
        true
    }

    async fn send(&self, message: &IpcMessage) -> Result<(), IpcError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn start_listening(&self, _handler: Option<MessageHandler>) {}

    async fn stop(&self) {}

    fn messages(&self) -> broadcast::Receiver<IpcMessage> {
        self.messages.subscribe()
    }

    fn connectivity(&self) -> broadcast::Receiver<bool> {
        self.connectivity.subscribe()
    }
}
