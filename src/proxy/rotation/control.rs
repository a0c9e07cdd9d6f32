//! Tor control port client
//!
//! Speaks the line-oriented control protocol: each command is one CRLF line,
//! each reply is one or more `NNN<sep>text` lines where `-` continues, `+`
//! opens a dot-terminated data block and a space ends the reply.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

use super::{RenewalChannel, RenewalConnector};
use crate::config::ControlConfig;
use crate::error::{ControlStage, Result, RotaError};

/// Tor refuses to honour NEWNYM more often than this
pub const NEWNYM_RATE_LIMIT: Duration = Duration::from_secs(10);

const REPLY_OK: u16 = 250;

/// Opens a new control port connection per call
///
/// The connect timeout also bounds every command exchange on the channels it
/// opens.
#[derive(Debug, Clone)]
pub struct TorControlConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TorControlConnector {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(
            format!("{}:{}", config.host, config.port),
            config.connect_timeout,
        )
    }
}

#[async_trait]
impl RenewalConnector for TorControlConnector {
    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn connect(&self) -> Result<Box<dyn RenewalChannel>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                RotaError::control(
                    ControlStage::Connect,
                    format!("timed out connecting to {}", self.addr),
                )
            })?
            .map_err(|e| {
                RotaError::control(ControlStage::Connect, format!("{}: {}", self.addr, e))
            })?;

        debug!("Control channel connected");
        Ok(Box::new(TorControlChannel::new(stream, self.connect_timeout)))
    }
}

#[derive(Debug)]
struct ControlReply {
    code: u16,
    lines: Vec<String>,
}

impl ControlReply {
    fn is_ok(&self) -> bool {
        self.code == REPLY_OK
    }

    fn summary(&self) -> String {
        format!("{} {}", self.code, self.lines.last().map(String::as_str).unwrap_or(""))
    }
}

/// One control port session
pub struct TorControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    reply_timeout: Duration,
    last_newnym: Option<Instant>,
}

impl TorControlChannel {
    pub fn new(stream: TcpStream, reply_timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            reply_timeout,
            last_newnym: None,
        }
    }

    fn newnym_wait(&self) -> Duration {
        match self.last_newnym {
            Some(at) => NEWNYM_RATE_LIMIT.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Send one command and read its reply, bounded by the reply timeout
    async fn command(&mut self, line: &str, stage: ControlStage) -> Result<ControlReply> {
        let reply_timeout = self.reply_timeout;
        timeout(reply_timeout, self.exchange(line, stage))
            .await
            .map_err(|_| {
                RotaError::control(
                    stage,
                    format!("timed out after {:?} waiting for reply", reply_timeout),
                )
            })?
    }

    async fn exchange(&mut self, line: &str, stage: ControlStage) -> Result<ControlReply> {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| RotaError::control(stage, format!("write failed: {}", e)))?;
        self.read_reply(stage).await
    }

    async fn read_reply(&mut self, stage: ControlStage) -> Result<ControlReply> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line(stage).await?;
            let (code, sep, text) = split_reply_line(&line)?;

            match sep {
                ' ' => {
                    lines.push(text.to_string());
                    return Ok(ControlReply { code, lines });
                }
                '-' => lines.push(text.to_string()),
                '+' => {
                    lines.push(text.to_string());
                    loop {
                        let data = self.read_line(stage).await?;
                        if data == "." {
                            break;
                        }
                        lines.push(data);
                    }
                }
                other => {
                    return Err(RotaError::control(
                        ControlStage::Protocol,
                        format!("unexpected reply separator {:?}", other),
                    ))
                }
            }
        }
    }

    async fn read_line(&mut self, stage: ControlStage) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| RotaError::control(stage, format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(RotaError::control(stage, "connection closed by backend"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl RenewalChannel for TorControlChannel {
    async fn authenticate(&mut self, credential: &str) -> Result<()> {
        let command = if credential.is_empty() {
            "AUTHENTICATE".to_string()
        } else {
            format!("AUTHENTICATE \"{}\"", quote(credential))
        };

        let reply = self.command(&command, ControlStage::Authenticate).await?;
        if !reply.is_ok() {
            return Err(RotaError::control(ControlStage::Authenticate, reply.summary()));
        }
        Ok(())
    }

    async fn is_renewal_available(&mut self) -> Result<bool> {
        Ok(self.newnym_wait().is_zero())
    }

    async fn signal_renewal(&mut self) -> Result<()> {
        let reply = self.command("SIGNAL NEWNYM", ControlStage::Signal).await?;
        if !reply.is_ok() {
            return Err(RotaError::control(ControlStage::Signal, reply.summary()));
        }
        self.last_newnym = Some(Instant::now());
        Ok(())
    }

    async fn minimum_wait(&mut self) -> Result<Duration> {
        Ok(self.newnym_wait())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        // Tor answers QUIT with "250 closing connection"; a missing reply is fine.
        if let Err(e) = self.command("QUIT", ControlStage::Protocol).await {
            debug!("QUIT not acknowledged: {}", e);
        }
        timeout(self.reply_timeout, self.writer.shutdown())
            .await
            .map_err(|_| RotaError::control(ControlStage::Protocol, "shutdown timed out"))?
            .map_err(|e| RotaError::control(ControlStage::Protocol, format!("shutdown failed: {}", e)))
    }
}

fn split_reply_line(line: &str) -> Result<(u16, char, &str)> {
    let malformed = || {
        RotaError::control(
            ControlStage::Protocol,
            format!("malformed reply line: {:?}", line),
        )
    };

    let code = line
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let sep = line.get(3..4).and_then(|s| s.chars().next()).ok_or_else(malformed)?;
    let text = line.get(4..).unwrap_or("");

    Ok((code, sep, text))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
