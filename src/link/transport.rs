//! Line-oriented transport seam underneath the protocol engine.
//!
//! The protocol engine only ever exchanges newline-terminated text with the
//! firmware, so the seam is a pair of line operations. `SerialTransport` is
//! the production implementation; `ScriptedTransport` replays canned
//! firmware responses for tests and bench rigs.

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[async_trait]
pub trait Transport: Send {
    /// Writes one line, appending the terminator.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads the next complete line, without its terminator.
    async fn read_line(&mut self) -> io::Result<String>;

    /// Drops any input buffered before the call.
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Serial port transport with an internal line reassembly buffer.
pub struct SerialTransport {
    port: SerialPort,
    buffer: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port: SerialPort) -> Self {
        Self {
            port,
            buffer: Vec::new(),
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let framed = format!("{line}\n");
        let bytes = framed.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            let n = self.port.write(&bytes[written..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "serial port accepted no bytes",
                ));
            }
            written += n;
        }
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(line);
            }
            let mut chunk = [0u8; 256];
            let n = self.port.read(&mut chunk).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial connection closed",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.port.discard_input_buffer()
    }
}

/// In-memory transport replaying a scripted firmware conversation.
///
/// Each outgoing line consumes the next reply script (a list of inbound
/// lines queued in response); once scripts run out, every write is answered
/// with a plain `ok`. Reads poll the inbound queue so a paused worker sends
/// nothing and a starved read eventually errors instead of hanging a test.
pub struct ScriptedTransport {
    inbound: VecDeque<String>,
    scripts: VecDeque<Vec<String>>,
    /// Artificial delay per delivered reply, to give control operations a
    /// window between commands.
    latency: Duration,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            scripts: VecDeque::new(),
            latency: Duration::ZERO,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues a line as if the device had sent it unprompted (boot banner).
    pub fn queue_inbound(&mut self, line: &str) {
        self.inbound.push_back(line.to_string());
    }

    /// Scripts the reply lines for the next unscripted outgoing line.
    /// An empty script means the device stays silent for that write.
    pub fn script_reply(&mut self, replies: &[&str]) {
        self.scripts
            .push_back(replies.iter().map(|r| r.to_string()).collect());
    }

    /// Shared log of every line written to the device, in order.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.sent.lock().unwrap().push(line.to_string());
        match self.scripts.pop_front() {
            Some(replies) => self.inbound.extend(replies),
            None => self.inbound.push_back("ok".to_string()),
        }
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        // Poll for up to ~10s so an outer timeout can fire first.
        for _ in 0..2000 {
            if let Some(line) = self.inbound.pop_front() {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                return Ok(line);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "scripted transport has no reply queued",
        ))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        // Keep scripted lines: tests queue the boot banner before connect.
        Ok(())
    }
}
