//! Unix socket session management

use std::sync::Arc;

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::unix::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex,
};

use crate::{
    core::{
        error::{TransportError, TransportResult},
        types::SessionId,
    },
    protocol::{JsonRpcNotification, JsonRpcResponse},
};

/// Upper bound for one request line
const MAX_LINE_LEN: usize = 64 * 1024;

/// Write side of a client session, shared by the request loop and the
/// notification forwarder
#[derive(Debug, Clone)]
pub struct UnixSocketSession {
    id: SessionId,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl UnixSocketSession {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            id: SessionId::new(),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn send_response(&self, response: &JsonRpcResponse) -> TransportResult<()> {
        self.send_line(response).await
    }

    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> TransportResult<()> {
        self.send_line(notification).await
    }

    async fn send_line<T: Serialize>(&self, message: &T) -> TransportResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        // one write per message keeps lines from interleaving
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read side of a client session
pub struct SessionReader {
    reader: BufReader<OwnedReadHalf>,
}

impl SessionReader {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Next newline-delimited message, `None` on EOF
    ///
    /// At most `MAX_LINE_LEN` bytes plus the newline are buffered; a longer
    /// line is an error.
    pub async fn read_line(&mut self) -> TransportResult<Option<String>> {
        let mut line = Vec::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") && line.len() > MAX_LINE_LEN {
            return Err(TransportError::Protocol(format!(
                "request line exceeds {MAX_LINE_LEN} bytes"
            )));
        }

        let trimmed = line.trim_ascii_end().len();
        line.truncate(trimmed);
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| TransportError::Protocol(format!("request line is not UTF-8: {e}")))
    }
}
