//! Framed message channel between the capture service and the viewer.
//!
//! Both roles expose the same [`Channel`] surface; the difference is purely
//! in connection establishment (bind-and-accept vs dial-with-retry).

pub mod codec;
pub mod message;

mod client;
mod endpoint;
mod server;

pub use client::PipeClient;
pub use endpoint::{socket_path, MessageHandler};
pub use message::{DeviceEvent, DeviceEventKind, IpcMessage, MessageKind, MessagePayload};
pub use server::PipeServer;

use crate::error::IpcError;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Role-independent view of one end of the channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Whether a peer session is currently established.
    fn is_connected(&self) -> bool;

    /// Frame and send a message to the peer.
    async fn send(&self, message: &IpcMessage) -> Result<(), IpcError>;

    /// Start the background connection loop. Safe to call with no handler;
    /// inbound messages are still broadcast to subscribers.
    fn start_listening(&self, handler: Option<MessageHandler>);

    /// Stop the connection loop and release the socket. Idempotent.
    async fn stop(&self);

    /// Subscribe to inbound messages.
    fn messages(&self) -> broadcast::Receiver<IpcMessage>;

    /// Subscribe to connectivity transitions. `false` is also emitted for
    /// each failed connection attempt while reconnecting.
    fn connectivity(&self) -> broadcast::Receiver<bool>;
}
