//! IPC message envelope and typed payload bodies.
//!
//! Each message `kind` owns a concrete payload shape; the wire `kind`
//! discriminant is derived from the payload variant rather than carried
//! separately, so a decoded message can never disagree with its body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Closed set of message kinds carried on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    NewMediaAvailable,
    StatusUpdate,
    DeviceEvent,
    ServiceStarted,
    ServiceStopped,
    PrintRequest,
    Error,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceEventKind {
    DeviceInserted,
    DeviceRemoved,
    DownloadStarted,
    DownloadCompleted,
    DownloadFailed,
}

/// Body of a `DeviceEvent` message.
///
/// Field names are written camelCase and matched case-insensitively on
/// decode (the codec lowercases keys before deserializing, hence the split
/// serialize/deserialize renames).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(rename(serialize = "eventKind", deserialize = "eventkind"))]
    pub event_kind: DeviceEventKind,
    #[serde(rename(serialize = "driveIdentifier", deserialize = "driveidentifier"))]
    pub drive_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tagged payload union; one variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    NewMediaAvailable { count: u64 },
    StatusUpdate { status: String },
    DeviceEvent(DeviceEvent),
    ServiceStarted { service: String },
    ServiceStopped { service: String },
    PrintRequest { path: String },
    Error { message: String },
    Heartbeat,
}

#[derive(Deserialize)]
struct CountBody {
    count: u64,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Deserialize)]
struct ServiceBody {
    service: String,
}

#[derive(Deserialize)]
struct PathBody {
    path: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::NewMediaAvailable { .. } => MessageKind::NewMediaAvailable,
            Self::StatusUpdate { .. } => MessageKind::StatusUpdate,
            Self::DeviceEvent(_) => MessageKind::DeviceEvent,
            Self::ServiceStarted { .. } => MessageKind::ServiceStarted,
            Self::ServiceStopped { .. } => MessageKind::ServiceStopped,
            Self::PrintRequest { .. } => MessageKind::PrintRequest,
            Self::Error { .. } => MessageKind::Error,
            Self::Heartbeat => MessageKind::Heartbeat,
        }
    }

    pub(crate) fn to_value(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Self::NewMediaAvailable { count } => json!({ "count": count }),
            Self::StatusUpdate { status } => json!({ "status": status }),
            Self::DeviceEvent(event) => serde_json::to_value(event)?,
            Self::ServiceStarted { service } | Self::ServiceStopped { service } => {
                json!({ "service": service })
            }
            Self::PrintRequest { path } => json!({ "path": path }),
            Self::Error { message } => json!({ "message": message }),
            Self::Heartbeat => Value::Null,
        })
    }

    pub(crate) fn from_value(kind: MessageKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            MessageKind::NewMediaAvailable => {
                let body: CountBody = serde_json::from_value(value)?;
                Self::NewMediaAvailable { count: body.count }
            }
            MessageKind::StatusUpdate => {
                let body: StatusBody = serde_json::from_value(value)?;
                Self::StatusUpdate {
                    status: body.status,
                }
            }
            MessageKind::DeviceEvent => Self::DeviceEvent(serde_json::from_value(value)?),
            MessageKind::ServiceStarted => {
                let body: ServiceBody = serde_json::from_value(value)?;
                Self::ServiceStarted {
                    service: body.service,
                }
            }
            MessageKind::ServiceStopped => {
                let body: ServiceBody = serde_json::from_value(value)?;
                Self::ServiceStopped {
                    service: body.service,
                }
            }
            MessageKind::PrintRequest => {
                let body: PathBody = serde_json::from_value(value)?;
                Self::PrintRequest { path: body.path }
            }
            MessageKind::Error => {
                let body: ErrorBody = serde_json::from_value(value)?;
                Self::Error {
                    message: body.message,
                }
            }
            MessageKind::Heartbeat => Self::Heartbeat,
        })
    }
}

/// One unit of wire traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct IpcMessage {
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    /// Correlation id for logging only, never deduplication.
    pub message_id: Uuid,
    pub sender: String,
    pub receiver: String,
}

impl IpcMessage {
    pub fn new(payload: MessagePayload, sender: impl Into<String>) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
            sender: sender.into(),
            receiver: String::new(),
        }
    }

    pub fn to_peer(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = receiver.into();
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// Wire form of [`IpcMessage`]. Keys serialize camelCase; the deserialize
/// names are lowercase because the codec lowercases keys first.
#[derive(Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(rename(serialize = "messageId", deserialize = "messageid"))]
    pub message_id: Uuid,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
}
