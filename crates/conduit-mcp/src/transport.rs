//! MCP Transport layer implementations
//!
//! Messages are newline-delimited JSON objects in both directions.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace};

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, message: Value) -> io::Result<()>;
    /// Next message from the peer, or `None` once the stream is closed.
    async fn receive(&mut self) -> io::Result<Option<Value>>;
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> io::Result<()> {
    let json = serde_json::to_string(message)?;
    trace!(message = %json, "mcp send");
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<Option<Value>> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        trace!(message = %trimmed, "mcp receive");
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        return Ok(Some(value));
    }
}

/// Stdio transport for subprocess communication
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<BufReader<ChildStdout>>,
}

impl StdioTransport {
    /// Spawn `command args...` with `env` merged over the inherited environment.
    ///
    /// The child is killed if the transport is dropped without being closed.
    pub async fn spawn(
        command: &str,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdout"))?;

        debug!(command, pid = ?child.id(), "spawned provider process");

        Ok(Self {
            child,
            stdin: Some(stdin),
            reader: Some(BufReader::new(stdout)),
        })
    }

    /// OS process id, while the child is still running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Stdin not available"))?;
        write_line(stdin, &message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Reader not available"))?;
        read_line(reader).await
    }

    async fn close(&mut self) -> io::Result<()> {
        // Closing stdin lets well-behaved providers exit on their own.
        self.stdin.take();
        self.reader.take();
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

/// Transport over an arbitrary reader/writer pair, e.g. the halves of a
/// `tokio::io::duplex` pipe or a server's own stdin/stdout.
pub struct StreamTransport<R, W> {
    reader: BufReader<R>,
    writer: Option<W>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Transport closed"))?;
        write_line(writer, &message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        read_line(&mut self.reader).await
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_transport_exchanges_lines() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);

        let mut left = StreamTransport::new(a_read, a_write);
        let mut right = StreamTransport::new(b_read, b_write);

        left.send(json!({"hello": 1})).await.unwrap();
        left.send(json!({"hello": 2})).await.unwrap();

        assert_eq!(right.receive().await.unwrap(), Some(json!({"hello": 1})));
        assert_eq!(right.receive().await.unwrap(), Some(json!({"hello": 2})));
    }

    #[tokio::test]
    async fn test_receive_returns_none_after_peer_closes() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);

        let mut left = StreamTransport::new(a_read, a_write);
        let mut right = StreamTransport::new(b_read, b_write);

        left.close().await.unwrap();
        assert_eq!(right.receive().await.unwrap(), None);
        assert!(left.send(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_is_invalid_data() {
        let (a, b) = tokio::io::duplex(1024);
        let (_a_read, mut a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let mut right = StreamTransport::new(b_read, b_write);

        a_write.write_all(b"\n\nnot json\n").await.unwrap();
        let err = right.receive().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
