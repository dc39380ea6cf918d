//! Background execution of a command sequence against one printer link.
//!
//! One worker task owns the link for the lifetime of one job. The caller
//! cooperates through shared flags and a status field: pause and stop are
//! observed between commands, never inside the send-and-await-ack critical
//! section, so the line-number protocol state is never corrupted.

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{Config, DeviceConfig};
use crate::gcode::GcodeCommand;
use crate::link::{LinkError, LinkOptions, PrinterLink, SerialTransport, Transport};

/// How often a paused worker re-checks its flags.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of one print job. Transitions are linear aside from
/// Printing <-> Paused; Completed and Error are terminal for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintStatus {
    Idle,
    Connecting,
    Printing,
    Paused,
    Completed,
    Error,
}

/// Opens the transport a job worker will own exclusively.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, LinkError>;
}

/// Production connector: opens the configured serial port.
pub struct SerialConnector {
    port: String,
    baud: u32,
}

impl SerialConnector {
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            port: device.port.clone(),
            baud: device.baud,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        tracing::info!("opening {} at {} baud", self.port, self.baud);
        let port = SerialPort::open(&self.port, self.baud)
            .map_err(|e| LinkError::Connection(format!("{}: {e}", self.port)))?;
        Ok(Box::new(SerialTransport::new(port)))
    }
}

/// Hands out a single pre-built transport; for tests and bench rigs.
pub struct ScriptedConnector {
    transport: std::sync::Mutex<Option<Box<dyn Transport>>>,
}

impl ScriptedConnector {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: std::sync::Mutex::new(Some(Box::new(transport))),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, LinkError> {
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| LinkError::Connection("scripted transport already consumed".into()))
    }
}

struct JobShared {
    status: RwLock<PrintStatus>,
    pause: AtomicBool,
    stop: AtomicBool,
    acked: AtomicUsize,
}

impl JobShared {
    fn new() -> Self {
        Self {
            status: RwLock::new(PrintStatus::Connecting),
            pause: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            acked: AtomicUsize::new(0),
        }
    }

    fn paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn set_status(&self, status: PrintStatus) {
        *self.status.write().await = status;
    }
}

/// Caller-side handle to one submitted job.
pub struct JobHandle {
    id: Uuid,
    shared: Arc<JobShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Non-blocking snapshot of the job status.
    pub async fn status(&self) -> PrintStatus {
        *self.shared.status.read().await
    }

    /// Number of commands acknowledged by the device so far.
    pub fn commands_acknowledged(&self) -> usize {
        self.shared.acked.load(Ordering::SeqCst)
    }

    /// Pauses transmission at the next command boundary. Effective only
    /// while printing; the in-flight command still completes its
    /// acknowledgment wait.
    pub async fn pause(&self) {
        let mut status = self.shared.status.write().await;
        if *status == PrintStatus::Printing {
            self.shared.pause.store(true, Ordering::SeqCst);
            *status = PrintStatus::Paused;
            tracing::info!(job = %self.id, "print job paused");
        }
    }

    /// Resumes a paused job with the next untransmitted command.
    pub async fn resume(&self) {
        let mut status = self.shared.status.write().await;
        if *status == PrintStatus::Paused {
            self.shared.pause.store(false, Ordering::SeqCst);
            *status = PrintStatus::Printing;
            tracing::info!(job = %self.id, "print job resumed");
        }
    }

    /// Requests a stop and waits until the worker has observably halted.
    /// The worker runs the shutdown sequence before settling on `Idle`.
    pub async fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        tracing::info!(job = %self.id, "stop requested");
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Waits for the worker to finish and returns the settled status.
    pub async fn wait(&self) -> PrintStatus {
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        self.status().await
    }
}

/// Submits command sequences as background print jobs.
pub struct PrintJobController {
    connector: Arc<dyn Connector>,
    options: LinkOptions,
}

impl PrintJobController {
    pub fn new(config: &Config) -> Self {
        Self {
            connector: Arc::new(SerialConnector::new(&config.device)),
            options: LinkOptions::from_device(&config.device),
        }
    }

    pub fn with_connector(connector: Arc<dyn Connector>, options: LinkOptions) -> Self {
        Self { connector, options }
    }

    /// Starts a job on a background worker and returns immediately.
    pub fn submit(&self, commands: Vec<GcodeCommand>) -> JobHandle {
        let id = Uuid::new_v4();
        let shared = Arc::new(JobShared::new());
        let worker = tokio::spawn(run_job(
            id,
            Arc::clone(&shared),
            Arc::clone(&self.connector),
            self.options,
            commands,
        ));
        tracing::info!(job = %id, "print job submitted");
        JobHandle {
            id,
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }
}

async fn run_job(
    id: Uuid,
    shared: Arc<JobShared>,
    connector: Arc<dyn Connector>,
    options: LinkOptions,
    commands: Vec<GcodeCommand>,
) {
    let transport = match connector.connect().await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(job = %id, "connection failed: {e}");
            shared.set_status(PrintStatus::Error).await;
            return;
        }
    };

    let mut link = PrinterLink::new(transport, options);
    if let Err(e) = link.establish().await {
        tracing::error!(job = %id, "handshake failed: {e}");
        shared.set_status(PrintStatus::Error).await;
        return;
    }
    if let Err(e) = link.run_initialization().await {
        tracing::error!(job = %id, "initialization failed: {e}");
        shared.set_status(PrintStatus::Error).await;
        return;
    }

    shared.set_status(PrintStatus::Printing).await;
    tracing::info!(job = %id, "transmitting {} commands", commands.len());

    for command in &commands {
        if shared.stop_requested() {
            break;
        }
        while shared.paused() && !shared.stop_requested() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
        if shared.stop_requested() {
            break;
        }
        match link.send_command(&command.raw).await {
            Ok(()) => {
                shared.acked.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                // Device state is unknown: close without the shutdown
                // sequence.
                tracing::error!(job = %id, "transmission failed: {e}");
                shared.set_status(PrintStatus::Error).await;
                link.close();
                return;
            }
        }
    }

    let stopped = shared.stop_requested();
    if let Err(e) = link.run_shutdown().await {
        tracing::error!(job = %id, "shutdown sequence failed: {e}");
        shared.set_status(PrintStatus::Error).await;
        return;
    }
    if stopped {
        shared.set_status(PrintStatus::Idle).await;
        shared.stop.store(false, Ordering::SeqCst);
        shared.pause.store(false, Ordering::SeqCst);
        tracing::info!(job = %id, "print job stopped");
    } else {
        shared.set_status(PrintStatus::Completed).await;
        tracing::info!(job = %id, "print job completed");
    }
    link.close();
}
