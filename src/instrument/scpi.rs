//! SCPI-over-TCP transport.
//!
//! The FieldFox exposes its SCPI parser on a raw LAN socket (the same
//! command set as its telnet console). Exchanges are line-oriented:
//! commands go out CR-LF terminated, responses come back one line at a
//! time.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Line terminator the chamber instruments expect.
const TERMINATOR: &str = "\r\n";

/// A connected SCPI command/response channel over TCP.
pub struct ScpiTcpTransport {
    addr: String,
    timeout: Duration,
    stream: Option<BufStream<TcpStream>>,
}

impl ScpiTcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(30),
            stream: None,
        }
    }

    /// Set the per-exchange timeout. Analyzer sweeps can be slow at narrow
    /// resolution bandwidths, so the default is generous.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .with_context(|| format!("timed out connecting to {}", self.addr))?
            .with_context(|| format!("failed to connect to {}", self.addr))?;
        stream
            .set_nodelay(true)
            .context("failed to set TCP_NODELAY")?;
        self.stream = Some(BufStream::new(stream));
        debug!("SCPI transport connected to {}", self.addr);
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("SCPI transport to {} closed", self.addr);
        }
    }

    fn stream(&mut self) -> Result<&mut BufStream<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow!("SCPI transport to {} is not connected", self.addr))
    }

    /// Write a command with no expected response.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.stream()?;
        let framed = format!("{command}{TERMINATOR}");
        tokio::time::timeout(timeout, async {
            stream.write_all(framed.as_bytes()).await?;
            stream.flush().await
        })
        .await
        .with_context(|| format!("timed out sending '{command}'"))?
        .with_context(|| format!("failed to send '{command}'"))?;
        debug!("SCPI sent: {command}");
        Ok(())
    }

    /// Write a query and read one response line, trimmed.
    pub async fn query(&mut self, command: &str) -> Result<String> {
        self.send(command).await?;
        let timeout = self.timeout;
        let stream = self.stream()?;
        let mut line = String::new();
        let read = tokio::time::timeout(timeout, stream.read_line(&mut line))
            .await
            .with_context(|| format!("timed out awaiting response to '{command}'"))?
            .with_context(|| format!("failed to read response to '{command}'"))?;
        if read == 0 {
            return Err(anyhow!("connection closed while awaiting response to '{command}'"));
        }
        let response = line.trim().to_string();
        debug!("SCPI query '{command}' -> '{response}'");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn query_round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let read = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..read], b"*OPC?\r\n");
            socket.write_all(b"+1\n").await.unwrap();
        });

        let mut transport = ScpiTcpTransport::new(addr.to_string());
        transport.connect().await.unwrap();
        let response = transport.query("*OPC?").await.unwrap();
        assert_eq!(response, "+1");
        transport.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_before_connect_is_an_error() {
        let mut transport = ScpiTcpTransport::new("127.0.0.1:1");
        assert!(transport.send("SYST:PRES").await.is_err());
    }
}
