//! Client shims for the two engine sockets
//!
//! Thin wrappers for tooling and tests: a request/response client for the
//! command socket and a pull-style reader for the event socket. Both speak
//! the same length-prefixed framing as the server.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::core::{Error, Result};
use crate::protocol::{encode, DecodeBuffer, Envelope};

/// Synchronous-feeling request/response over the command socket.
pub struct CommandClient {
    stream: UnixStream,
    buf: DecodeBuffer,
}

impl CommandClient {
    pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path.as_ref()))
            .await
            .map_err(|_| Error::Timeout("connect to command socket".into()))??;
        Ok(Self {
            stream,
            buf: DecodeBuffer::default(),
        })
    }

    /// Send one command and wait for its ack. Frames with a different req_id
    /// are skipped; the timeout covers the whole round trip.
    pub async fn send(
        &mut self,
        msg_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Envelope> {
        let req_id = uuid::Uuid::new_v4().to_string();
        let frame = encode(&Envelope::request(msg_type, &req_id, payload))?;
        self.stream.write_all(&frame).await?;

        tokio::time::timeout(timeout, self.read_until(&req_id))
            .await
            .map_err(|_| Error::Timeout(format!("ack for {}", msg_type)))?
    }

    async fn read_until(&mut self, req_id: &str) -> Result<Envelope> {
        let mut chunk = [0u8; 8192];
        loop {
            while let Some(env) = self.buf.next()? {
                if env.req_id.as_deref() == Some(req_id) {
                    return Ok(env);
                }
                debug!(got = ?env.req_id, "skipping ack for another request");
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Protocol("command socket closed mid-request".into()));
            }
            self.buf.feed(&chunk[..n]);
        }
    }
}

/// Pull-style reader over the event socket.
pub struct EventClient {
    stream: UnixStream,
    buf: DecodeBuffer,
}

impl EventClient {
    pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path.as_ref()))
            .await
            .map_err(|_| Error::Timeout("connect to event socket".into()))??;
        Ok(Self {
            stream,
            buf: DecodeBuffer::default(),
        })
    }

    /// Block until the next event arrives or the timeout elapses.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Envelope> {
        tokio::time::timeout(timeout, self.read_one())
            .await
            .map_err(|_| Error::Timeout("next event".into()))?
    }

    async fn read_one(&mut self) -> Result<Envelope> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(env) = self.buf.next()? {
                return Ok(env);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Protocol("event socket closed".into()));
            }
            self.buf.feed(&chunk[..n]);
        }
    }
}
