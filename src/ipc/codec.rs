//! Length-prefixed framing for IPC messages.
//!
//! Wire format: 4-byte little-endian length, then that many bytes of UTF-8
//! JSON. Field names are matched case-insensitively on decode to tolerate
//! schema drift between the two processes.

use crate::error::FramingError;
use crate::ipc::message::{Envelope, IpcMessage, MessagePayload};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a serialized payload body.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Upper bound on a whole frame: payload cap plus envelope allowance
/// (kind, timestamp, ids, sender/receiver labels).
pub const MAX_FRAME_BYTES: usize = MAX_PAYLOAD_BYTES + 4096;

/// Serialize a message into a ready-to-write frame.
pub fn encode(message: &IpcMessage) -> Result<Bytes, FramingError> {
    let payload = message
        .payload
        .to_value()
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))?;
    let payload_len = payload_byte_len(&payload)?;
    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(FramingError::LengthOutOfRange {
            length: payload_len as u64,
        });
    }

    let envelope = Envelope {
        kind: message.kind(),
        payload,
        timestamp: message.timestamp,
        message_id: message.message_id,
        sender: message.sender.clone(),
        receiver: message.receiver.clone(),
    };
    let body = serde_json::to_vec(&envelope)
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FramingError::LengthOutOfRange {
            length: body.len() as u64,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode a frame body (the bytes after the length prefix).
pub fn decode_body(body: &[u8]) -> Result<IpcMessage, FramingError> {
    let raw: Value = serde_json::from_slice(body)
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))?;
    let envelope: Envelope = serde_json::from_value(lowercase_keys(raw))
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))?;

    let payload_len = payload_byte_len(&envelope.payload)?;
    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(FramingError::LengthOutOfRange {
            length: payload_len as u64,
        });
    }

    let payload = MessagePayload::from_value(envelope.kind, envelope.payload)
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))?;
    Ok(IpcMessage {
        payload,
        timestamp: envelope.timestamp,
        message_id: envelope.message_id,
        sender: envelope.sender,
        receiver: envelope.receiver,
    })
}

/// Read one framed message, tolerating short reads from the stream.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<IpcMessage, FramingError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            FramingError::TruncatedHeader
        } else {
            FramingError::Io(err)
        }
    })?;

    let length = u32::from_le_bytes(header);
    if length == 0 || length as usize > MAX_FRAME_BYTES {
        return Err(FramingError::LengthOutOfRange {
            length: u64::from(length),
        });
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            FramingError::TruncatedBody {
                expected: length as usize,
            }
        } else {
            FramingError::Io(err)
        }
    })?;

    decode_body(&body)
}

/// Write one framed message and flush before returning.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &IpcMessage,
) -> Result<(), FramingError> {
    let frame = encode(message)?;
    writer.write_all(&frame).await.map_err(FramingError::Io)?;
    writer.flush().await.map_err(FramingError::Io)?;
    Ok(())
}

fn payload_byte_len(payload: &Value) -> Result<usize, FramingError> {
    if payload.is_null() {
        return Ok(0);
    }
    serde_json::to_vec(payload)
        .map(|bytes| bytes.len())
        .map_err(|err| FramingError::MalformedPayload(err.to_string()))
}

/// Normalize every object key to lowercase so field matching is
/// case-insensitive; values are left untouched.
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), lowercase_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}
