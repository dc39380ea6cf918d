//! Checksummed, line-numbered serial protocol to the embosser firmware.
//!
//! Every outgoing command is framed as `N<line> <command>*<checksum>` where
//! the checksum is the 8-bit XOR of the frame text before the `*`. The
//! firmware acknowledges each frame with `ok`, or asks for recovery with a
//! `Resend:` directive or a checksum/line-number error carrying the last
//! good line. The link retransmits the same command verbatim until it is
//! acknowledged, so delivery is at-least-once and strictly in order.

pub mod transport;

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::config::DeviceConfig;
pub use transport::{ScriptedTransport, SerialTransport, Transport};

/// Commands run once after the handshake, before any job commands: set up
/// positioning modes, allow cold extrusion, home, and work the punch pin
/// through a short calibration cycle.
const INIT_SEQUENCE: &[&str] = &[
    "G91",
    "G1 Z10 F800",
    "G90",
    "M83",
    "M302 S0",
    "G28",
    "G1 E2.2 F200",
    "G1 E-2.2 F200",
    "G1 E2.2 F200",
    "G1 E-2.2 F200",
    "G1 E1.5 F200",
    "G1 Z3 F800",
];

/// Commands run on normal completion or stop: raise the head, re-zero the
/// lateral axes, then lift clear so the page can be removed. Never run after
/// a fault, since the device state is unknown.
const SHUTDOWN_SEQUENCE: &[&str] = &["G1 Z10 F800", "G28 X0 Y0", "G1 Z50 F800"];

/// Fallback punch-axis calibration until the firmware echoes its own.
const DEFAULT_E_STEPS_PER_UNIT: f64 = 400.0;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Port unopenable or boot banner never arrived.
    #[error("connection failed: {0}")]
    Connection(String),
    /// I/O failure mid-send or mid-read; the link is faulted.
    #[error("serial transmission failed: {0}")]
    Transmission(#[from] io::Error),
    /// Configured acknowledgment timeout exceeded; the link is faulted.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Faulted,
}

/// Timing knobs for one link, taken from [`DeviceConfig`].
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub connect_timeout: Duration,
    /// `None` waits forever for each acknowledgment, matching the original
    /// firmware contract. Setting it bounds the wedged-device stall.
    pub ack_timeout: Option<Duration>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: None,
        }
    }
}

impl LinkOptions {
    pub fn from_device(device: &DeviceConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(device.connect_timeout_secs),
            ack_timeout: device.ack_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// 8-bit XOR checksum over the frame text before the `*`.
pub fn checksum(frame: &str) -> u8 {
    frame.bytes().fold(0, |acc, byte| acc ^ byte)
}

/// Builds the wire frame for a command at the given line number. Commands
/// that already carry an explicit `N` keep it; an existing `*` suppresses
/// the checksum.
fn frame(line_number: u32, command: &str) -> String {
    let body = if command.starts_with('N') {
        command.to_string()
    } else {
        format!("N{line_number} {command}")
    };
    if body.contains('*') {
        body
    } else {
        let sum = checksum(&body);
        format!("{body}*{sum}")
    }
}

/// Classification of one inbound firmware line.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    /// `ok`: the outstanding command is acknowledged.
    Ack,
    /// `Resend:<n>`: rewind the counter to `n` and retransmit.
    Resend(u32),
    /// Checksum or line-number error; `last_line` is the last good line if
    /// it could be parsed.
    Recoverable { last_line: Option<u32> },
    /// `M92` diagnostic echo carrying the punch-axis steps-per-unit.
    Calibration(f64),
    /// Anything else; ignored.
    Other,
}

fn parse_trailing_u32(text: &str) -> Option<u32> {
    text.trim().split_whitespace().next()?.parse().ok()
}

fn classify(line: &str) -> Reply {
    let lower = line.to_ascii_lowercase();
    if let Some((_, rest)) = lower.split_once("resend:") {
        match parse_trailing_u32(rest) {
            Some(n) => return Reply::Resend(n),
            None => {
                tracing::warn!("resend directive without a line number: {line:?}");
                return Reply::Other;
            }
        }
    }
    if lower.contains("checksum mismatch") || lower.contains("line number is not") {
        let last_line = lower
            .split_once("last line:")
            .and_then(|(_, rest)| parse_trailing_u32(rest));
        return Reply::Recoverable { last_line };
    }
    if lower.contains("echo:") && lower.contains("m92") {
        for token in lower.split_whitespace() {
            if let Some(value) = token.strip_prefix('e') {
                if let Ok(steps) = value.parse::<f64>() {
                    return Reply::Calibration(steps);
                }
            }
        }
        tracing::warn!("unparseable calibration echo: {line:?}");
        return Reply::Other;
    }
    if lower.contains("ok") {
        return Reply::Ack;
    }
    Reply::Other
}

/// Outcome of one wait-for-acknowledgment round.
enum SendOutcome {
    Acked,
    Retransmit,
}

/// Owns the serial transport and the protocol state for one job.
pub struct PrinterLink {
    transport: Box<dyn Transport>,
    state: LinkState,
    line_number: u32,
    e_steps_per_unit: f64,
    options: LinkOptions,
}

impl PrinterLink {
    pub fn new(transport: Box<dyn Transport>, options: LinkOptions) -> Self {
        Self {
            transport,
            state: LinkState::Disconnected,
            line_number: 0,
            e_steps_per_unit: DEFAULT_E_STEPS_PER_UNIT,
            options,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Punch-axis calibration, updated opportunistically from `M92` echoes.
    pub fn e_steps_per_unit(&self) -> f64 {
        self.e_steps_per_unit
    }

    /// Waits for the boot banner, then synchronizes line numbering and
    /// enables diagnostic echoes. The link is `Ready` afterwards.
    pub async fn establish(&mut self) -> Result<(), LinkError> {
        self.state = LinkState::Connecting;
        if let Err(e) = self.transport.discard_input() {
            self.state = LinkState::Faulted;
            return Err(LinkError::Transmission(e));
        }
        self.wait_for_banner().await?;

        tracing::info!("device is up, performing handshake");
        self.state = LinkState::Handshaking;
        self.line_number = 0;
        // send_command retransmits internally until each of these is
        // acknowledged, so the probe completing means we are synchronized.
        self.send_command("M110 N0").await?;
        self.send_command("M115").await?;
        self.send_command("M111 S6").await?;
        self.state = LinkState::Ready;
        tracing::info!("handshake complete");
        Ok(())
    }

    async fn wait_for_banner(&mut self) -> Result<(), LinkError> {
        let limit = self.options.connect_timeout;
        let result = tokio::time::timeout(limit, async {
            loop {
                let line = self.transport.read_line().await?;
                tracing::debug!("RX {line}");
                if line.to_ascii_lowercase().contains("start") {
                    return Ok::<(), io::Error>(());
                }
            }
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.state = LinkState::Faulted;
                Err(LinkError::Transmission(e))
            }
            Err(_) => {
                self.state = LinkState::Faulted;
                Err(LinkError::Connection(format!(
                    "no boot banner within {limit:?}"
                )))
            }
        }
    }

    /// Transmits one command and blocks until the device acknowledges it,
    /// honoring resend and error directives by retransmitting the same
    /// command verbatim. The line counter advances by exactly one per
    /// acknowledgment and is otherwise only rewound by the device.
    pub async fn send_command(&mut self, command: &str) -> Result<(), LinkError> {
        loop {
            let wire = frame(self.line_number, command);
            tracing::debug!("TX {wire}");
            if let Err(e) = self.transport.write_line(&wire).await {
                self.state = LinkState::Faulted;
                return Err(LinkError::Transmission(e));
            }
            match self.await_ack().await? {
                SendOutcome::Acked => return Ok(()),
                SendOutcome::Retransmit => continue,
            }
        }
    }

    async fn await_ack(&mut self) -> Result<SendOutcome, LinkError> {
        loop {
            let line = self.read_reply().await?;
            if line.is_empty() {
                continue;
            }
            tracing::debug!("RX {line}");
            match classify(&line) {
                Reply::Ack => {
                    self.line_number += 1;
                    return Ok(SendOutcome::Acked);
                }
                Reply::Resend(n) => {
                    tracing::warn!("device requested resend of line {n}");
                    self.line_number = n;
                    return Ok(SendOutcome::Retransmit);
                }
                Reply::Recoverable { last_line } => {
                    let next = last_line.map_or(1, |n| n + 1);
                    tracing::warn!("protocol error, resyncing line counter to {next}");
                    self.line_number = next;
                    return Ok(SendOutcome::Retransmit);
                }
                Reply::Calibration(steps) => {
                    tracing::debug!("punch axis calibration: {steps} steps/unit");
                    self.e_steps_per_unit = steps;
                }
                Reply::Other => {}
            }
        }
    }

    async fn read_reply(&mut self) -> Result<String, LinkError> {
        let line = match self.options.ack_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.transport.read_line()).await {
                Ok(result) => result,
                Err(_) => {
                    self.state = LinkState::Faulted;
                    return Err(LinkError::AckTimeout(limit));
                }
            },
            None => self.transport.read_line().await,
        };
        match line {
            Ok(line) => Ok(line),
            Err(e) => {
                self.state = LinkState::Faulted;
                Err(LinkError::Transmission(e))
            }
        }
    }

    /// Runs the fixed setup sequence once after the handshake.
    pub async fn run_initialization(&mut self) -> Result<(), LinkError> {
        for command in INIT_SEQUENCE {
            self.send_command(command).await?;
        }
        Ok(())
    }

    /// Runs the fixed teardown sequence on completion or stop.
    pub async fn run_shutdown(&mut self) -> Result<(), LinkError> {
        for command in SHUTDOWN_SEQUENCE {
            self.send_command(command).await?;
        }
        Ok(())
    }

    /// Releases the transport. Callers must have joined the worker that
    /// owned the link before calling this.
    pub fn close(self) {
        tracing::info!("link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_with(transport: ScriptedTransport) -> PrinterLink {
        PrinterLink::new(Box::new(transport), LinkOptions::default())
    }

    #[test]
    fn checksum_golden_vector() {
        // Canonical line-number-reset frame.
        assert_eq!(checksum("N0 M110 N0"), 125);
    }

    #[test]
    fn frame_numbers_and_checksums() {
        assert_eq!(frame(0, "M110 N0"), "N0 M110 N0*125");
        // Explicit line number is kept as-is.
        assert_eq!(frame(7, "N3 M110"), format!("N3 M110*{}", checksum("N3 M110")));
        // Existing checksum suppresses recomputation.
        assert_eq!(frame(2, "N2 G28*18"), "N2 G28*18");
    }

    #[test]
    fn classify_recognizes_protocol_lines() {
        assert_eq!(classify("ok"), Reply::Ack);
        assert_eq!(classify("OK T:24.3"), Reply::Ack);
        assert_eq!(classify("Resend: 5"), Reply::Resend(5));
        assert_eq!(
            classify("Error:checksum mismatch, Last Line: 12"),
            Reply::Recoverable {
                last_line: Some(12)
            }
        );
        assert_eq!(
            classify("Error:Line Number is not Last Line Number+1, Last Line: 3"),
            Reply::Recoverable { last_line: Some(3) }
        );
        assert_eq!(
            classify("echo:  M92 X80.00 Y80.00 Z400.00 E415.00"),
            Reply::Calibration(415.0)
        );
        assert_eq!(classify("echo:  M92 Xnope"), Reply::Other);
        assert_eq!(classify("busy: processing"), Reply::Other);
    }

    #[tokio::test]
    async fn counter_increments_once_per_ack() {
        let transport = ScriptedTransport::new();
        let mut link = link_with(transport);
        link.send_command("G28").await.unwrap();
        assert_eq!(link.line_number(), 1);
        link.send_command("G90").await.unwrap();
        assert_eq!(link.line_number(), 2);
    }

    #[tokio::test]
    async fn resend_rewinds_and_retransmits_verbatim() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&["Resend: 5"]);
        let sent = transport.sent_log();

        let mut link = link_with(transport);
        link.line_number = 7;
        link.send_command("G1 X10.0 Y10.0 F4000").await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("N7 G1 X10.0 Y10.0 F4000*"));
        assert!(sent[1].starts_with("N5 G1 X10.0 Y10.0 F4000*"));
        // Counter was set to 5 by the resend, then incremented by the ack.
        assert_eq!(link.line_number(), 6);
    }

    #[tokio::test]
    async fn checksum_error_resyncs_to_last_line_plus_one() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&["Error:checksum mismatch, Last Line: 3"]);
        let sent = transport.sent_log();

        let mut link = link_with(transport);
        link.line_number = 9;
        link.send_command("G28").await.unwrap();

        let sent = sent.lock().unwrap();
        assert!(sent[1].starts_with("N4 G28*"));
        assert_eq!(link.line_number(), 5);
    }

    #[tokio::test]
    async fn unparseable_last_line_resets_counter_to_one() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&["Error:checksum mismatch, Last Line: ???"]);
        let sent = transport.sent_log();

        let mut link = link_with(transport);
        link.line_number = 9;
        link.send_command("G28").await.unwrap();
        assert!(sent.lock().unwrap()[1].starts_with("N1 G28*"));
    }

    #[tokio::test]
    async fn calibration_echo_updates_steps_and_keeps_waiting() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&["echo:  M92 X80.00 Y80.00 Z400.00 E415.00", "ok"]);
        let sent = transport.sent_log();

        let mut link = link_with(transport);
        assert_eq!(link.e_steps_per_unit(), 400.0);
        link.send_command("M503").await.unwrap();
        assert_eq!(link.e_steps_per_unit(), 415.0);
        // The echo did not trigger a retransmission.
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unrelated_chatter_is_ignored() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&["busy: processing", "echo:SD card detected", "ok"]);
        let mut link = link_with(transport);
        link.send_command("G28").await.unwrap();
        assert_eq!(link.line_number(), 1);
    }

    #[tokio::test]
    async fn establish_handshakes_after_banner() {
        let mut transport = ScriptedTransport::new();
        transport.queue_inbound("Marlin noise");
        transport.queue_inbound("start");
        let sent = transport.sent_log();

        let mut link = link_with(transport);
        link.establish().await.unwrap();
        assert_eq!(link.state(), LinkState::Ready);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], "N0 M110 N0*125");
        assert!(sent[1].starts_with("N1 M115*"));
        assert!(sent[2].starts_with("N2 M111 S6*"));
    }

    #[tokio::test]
    async fn missing_banner_times_out_as_connection_error() {
        let transport = ScriptedTransport::new();
        let mut link = PrinterLink::new(
            Box::new(transport),
            LinkOptions {
                connect_timeout: Duration::from_millis(50),
                ack_timeout: None,
            },
        );
        let err = link.establish().await.unwrap_err();
        assert!(matches!(err, LinkError::Connection(_)));
        assert_eq!(link.state(), LinkState::Faulted);
    }

    #[tokio::test]
    async fn configured_ack_timeout_faults_the_link() {
        let mut transport = ScriptedTransport::new();
        transport.script_reply(&[]); // device goes silent
        let mut link = PrinterLink::new(
            Box::new(transport),
            LinkOptions {
                connect_timeout: Duration::from_secs(1),
                ack_timeout: Some(Duration::from_millis(50)),
            },
        );
        let err = link.send_command("G28").await.unwrap_err();
        assert!(matches!(err, LinkError::AckTimeout(_)));
        assert_eq!(link.state(), LinkState::Faulted);
    }

    #[tokio::test]
    async fn init_and_shutdown_sequences_are_fixed_and_ordered() {
        let transport = ScriptedTransport::new();
        let sent = transport.sent_log();
        let mut link = link_with(transport);

        link.run_initialization().await.unwrap();
        link.run_shutdown().await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), INIT_SEQUENCE.len() + SHUTDOWN_SEQUENCE.len());
        assert!(sent[0].contains("G91"));
        assert!(sent[5].contains("G28"));
        assert!(sent[INIT_SEQUENCE.len()].contains("G1 Z10 F800"));
        assert!(sent.last().unwrap().contains("G1 Z50 F800"));
    }
}
