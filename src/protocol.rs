//! Local IPC wire protocol (v1)
//!
//! Framing: `[u32 big-endian length][UTF-8 JSON bytes]` on both the command
//! and event channels. A frame whose JSON fails to parse is treated as a lost
//! message, not a stream-fatal error; the decode buffer skips it and keeps
//! going. Oversized frames are unrecoverable and poison the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Error, Result};

pub const PROTOCOL_VERSION: u8 = 1;

/// Common message envelope shared by both channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_version")]
    pub v: u8,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub payload: Value,
}

fn default_version() -> u8 {
    PROTOCOL_VERSION
}

/// Structured error carried in a negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Envelope {
    /// A bare command request (client side).
    pub fn request(msg_type: impl Into<String>, req_id: impl Into<String>, payload: Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            msg_type: msg_type.into(),
            ts: now_ts(),
            req_id: Some(req_id.into()),
            run_id: None,
            symbol: None,
            seq: None,
            ok: None,
            error: None,
            payload,
        }
    }

    /// A server-push event carrying the engine identity and sequence number.
    pub fn event(
        msg_type: impl Into<String>,
        run_id: impl Into<String>,
        symbol: impl Into<String>,
        seq: u64,
        payload: Value,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            msg_type: msg_type.into(),
            ts: now_ts(),
            req_id: None,
            run_id: Some(run_id.into()),
            symbol: Some(symbol.into()),
            seq: Some(seq),
            ok: None,
            error: None,
            payload,
        }
    }
}

/// Human-readable wall-clock timestamp, millisecond precision.
pub fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Serialize a message and prepend the 4-byte big-endian length prefix.
pub fn encode(msg: &Envelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > u32::MAX as usize {
        return Err(Error::Protocol("frame too large to encode".into()));
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Incremental decoder for a length-prefixed byte stream.
///
/// Feed raw socket bytes in, pull complete messages out. `next()` returns
/// `Ok(None)` when more bytes are needed.
pub struct DecodeBuffer {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl DecodeBuffer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.buf.extend_from_slice(data);
        }
    }

    /// Pop the next complete message, skipping unparseable frames.
    pub fn next(&mut self) -> Result<Option<Envelope>> {
        loop {
            if self.buf.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if len > self.max_frame_len {
                return Err(Error::Protocol(format!(
                    "frame length {} exceeds cap {}",
                    len, self.max_frame_len
                )));
            }
            if self.buf.len() < 4 + len {
                return Ok(None);
            }
            let frame: Vec<u8> = self.buf.drain(..4 + len).skip(4).collect();
            match serde_json::from_slice::<Envelope>(&frame) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    // Lost message, keep the stream alive.
                    tracing::warn!("dropping unparseable frame ({} bytes): {}", len, e);
                }
            }
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}
