use crate::core::framer::LineFramer;
use crate::core::record::OutboundRecord;
use crate::core::session::state::{DisconnectReason, SessionState};
use crate::core::sink::{dispatch, EventSink};
use crate::core::transport::{PortReader, PortWriter, SerialTransport};
use crate::domain::config::{DeviceId, PortConfig, SessionOptions};
use crate::domain::error::SessionError;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest `close` waits for the read worker to let go of the device
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest a timed-out write may keep holding the device after the session faults
const STALLED_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything held while the session is Open
struct OpenLink {
    device: DeviceId,
    config: PortConfig,
    writer: Arc<Mutex<PortWriter>>,
    cancel: Arc<AtomicBool>,
}

/// The device handle only exists inside `Open`, so it is held exactly when
/// the observable state is Open.
enum Phase {
    Closed,
    Open(OpenLink),
    Faulted(DisconnectReason),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Closed => SessionState::Closed,
            Phase::Open(_) => SessionState::Open,
            Phase::Faulted(_) => SessionState::Faulted,
        }
    }
}

/// Session state guarded by `Core::state`
struct Shared {
    phase: Phase,
    /// Bumped on every open; a worker only acts while its generation is live
    generation: u64,
    framer: LineFramer,
}

/// State shared between the session and its read worker.
///
/// `state` is only held for bookkeeping, never across a sink callback.
/// `delivery` is held while events are handed to the sink, which orders
/// events and lets `close` wait out a delivery already in flight. Lock
/// order is `delivery` then `state`.
struct Core {
    state: Mutex<Shared>,
    delivery: Mutex<()>,
}

impl Core {
    fn new(phase: Phase, generation: u64) -> Self {
        Self {
            state: Mutex::new(Shared {
                phase,
                generation,
                framer: LineFramer::new(),
            }),
            delivery: Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, Shared> {
        lock(&self.state)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        lock(&self.delivery)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forward a chunk to the framer and sink. Returns false once the worker's
/// session is no longer the live Open one; the chunk is dropped in that case.
fn deliver(core: &Core, sink: &dyn EventSink, generation: u64, chunk: &[u8]) -> bool {
    let _delivery = core.delivery();
    let record = {
        let mut guard = core.state();
        if guard.generation != generation || !guard.phase.state().is_open() {
            debug!("Dropping {} bytes read after session left Open", chunk.len());
            return false;
        }
        guard.framer.on_chunk(chunk)
    };

    if let Some(record) = record {
        dispatch(sink, |s| s.on_record(record));
    }
    true
}

/// Move the live Open session to Faulted, releasing the write half and
/// stopping the read worker.
fn fault(core: &Core, sink: &dyn EventSink, generation: u64, reason: DisconnectReason) -> bool {
    let _delivery = core.delivery();
    let flushed = {
        let mut guard = core.state();
        if guard.generation != generation || !guard.phase.state().is_open() {
            return false;
        }

        let flushed = guard.framer.finish();
        let previous = std::mem::replace(&mut guard.phase, Phase::Faulted(reason.clone()));
        if let Phase::Open(link) = previous {
            link.cancel.store(true, Ordering::Release);
            error!("Serial session on '{}' faulted: {}", link.device, reason);
        }
        flushed
    };

    if let Some(record) = flushed {
        dispatch(sink, |s| s.on_record(record));
    }
    dispatch(sink, |s| {
        s.on_state_change(SessionState::Faulted, Some(reason.to_string()))
    });
    true
}

/// Background reader owning the read half of the device
struct ReadWorker {
    reader: PortReader,
    core: Arc<Core>,
    sink: Arc<dyn EventSink>,
    cancel: Arc<AtomicBool>,
    generation: u64,
    buffer_size: usize,
}

impl ReadWorker {
    fn run(self) {
        let ReadWorker {
            mut reader,
            core,
            sink,
            cancel,
            generation,
            buffer_size,
        } = self;
        let mut buffer = vec![0u8; buffer_size.max(1)];

        let reason = loop {
            if cancel.load(Ordering::Acquire) {
                debug!("Read worker for generation {} stopped", generation);
                return;
            }

            match reader.read(&mut buffer) {
                Ok(0) => break DisconnectReason::EndOfStream,
                Ok(n) => {
                    debug!("Received {} bytes over serial", n);
                    if !deliver(&core, sink.as_ref(), generation, &buffer[..n]) {
                        return;
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Failed to read from serial port: {}", e);
                    break DisconnectReason::StreamError(e.to_string());
                }
            }
        };

        // Let go of the device before anyone can observe the fault.
        drop(reader);
        fault(&core, sink.as_ref(), generation, reason);
    }
}

#[derive(Default)]
struct Control {
    reader_task: Option<JoinHandle<()>>,
}

/// Single-owner manager of one serial device session.
///
/// `open`, `write` and `close` are serialized against each other; inbound
/// data is read on a blocking worker and delivered to the [`EventSink`].
/// Failures on the read path never surface from these methods, only as a
/// transition to [`SessionState::Faulted`] reported to the sink.
///
/// Sink callbacks run without any session lock held, so a sink may query
/// `state()` and the other accessors from inside a callback.
pub struct SerialSession {
    transport: Arc<dyn SerialTransport>,
    sink: Arc<dyn EventSink>,
    options: SessionOptions,
    control: tokio::sync::Mutex<Control>,
    core: Arc<Core>,
}

impl SerialSession {
    pub fn new(
        transport: Arc<dyn SerialTransport>,
        sink: Arc<dyn EventSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            sink,
            options,
            control: tokio::sync::Mutex::new(Control::default()),
            core: Arc::new(Core::new(Phase::Closed, 0)),
        }
    }

    /// Open `device` with `config` and start streaming inbound data.
    ///
    /// Rejected with [`SessionError::AlreadyOpen`] while a session is open.
    /// Opening a faulted session clears the fault first.
    pub async fn open(&self, device: DeviceId, config: PortConfig) -> Result<(), SessionError> {
        let mut control = self.control.lock().await;

        {
            let _delivery = self.core.delivery();
            let cleared = {
                let mut guard = self.core.state();
                if let Phase::Open(link) = &guard.phase {
                    warn!(
                        "Rejected open of '{}': session already open on '{}'",
                        device, link.device
                    );
                    return Err(SessionError::AlreadyOpen {
                        device: link.device.to_string(),
                    });
                }
                let faulted = matches!(guard.phase, Phase::Faulted(_));
                if faulted {
                    guard.phase = Phase::Closed;
                }
                faulted
            };
            if cleared {
                dispatch(self.sink.as_ref(), |s| {
                    s.on_state_change(SessionState::Closed, None)
                });
            }
        }

        // A faulted worker may still be winding down.
        self.join_reader(&mut control).await;

        let transport = Arc::clone(&self.transport);
        let options = self.options.clone();
        let target = device.clone();
        let opened = tokio::task::spawn_blocking(move || transport.open(&target, &config, &options))
            .await
            .map_err(|e| SessionError::DeviceUnavailable {
                device: device.to_string(),
                message: format!("open task failed: {}", e),
            })?;

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open serial session: {}", e);
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let generation = {
            let _delivery = self.core.delivery();
            let generation = {
                let mut guard = self.core.state();
                guard.generation = guard.generation.wrapping_add(1);
                guard.framer.reset();
                guard.phase = Phase::Open(OpenLink {
                    device: device.clone(),
                    config,
                    writer: Arc::new(Mutex::new(handle.writer)),
                    cancel: Arc::clone(&cancel),
                });
                guard.generation
            };
            dispatch(self.sink.as_ref(), |s| {
                s.on_state_change(SessionState::Open, None)
            });
            generation
        };

        let worker = ReadWorker {
            reader: handle.reader,
            core: Arc::clone(&self.core),
            sink: Arc::clone(&self.sink),
            cancel,
            generation,
            buffer_size: self.options.read_buffer_size,
        };
        control.reader_task = Some(tokio::task::spawn_blocking(move || worker.run()));

        info!("Serial session opened on '{}' ({})", device, config);
        Ok(())
    }

    /// Write `data` verbatim.
    ///
    /// A driver error or a write exceeding the configured bound faults the
    /// session and releases the device before returning.
    pub async fn write(&self, data: &[u8]) -> Result<OutboundRecord, SessionError> {
        let mut control = self.control.lock().await;

        let (writer, generation) = {
            let guard = self.core.state();
            match &guard.phase {
                Phase::Open(link) => (Arc::clone(&link.writer), guard.generation),
                _ => return Err(SessionError::NotOpen),
            }
        };

        let payload = data.to_vec();
        let mut task = tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut port = writer.lock().unwrap_or_else(PoisonError::into_inner);
            port.write_all(&payload)?;
            port.flush()
        });

        let write_timeout = self.options.write_timeout();
        let mut timed_out = false;
        let outcome = match tokio::time::timeout(write_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("write task failed: {}", e)),
            Err(_) => {
                timed_out = true;
                Err(format!("timed out after {} ms", write_timeout.as_millis()))
            }
        };

        match outcome {
            Ok(()) => {
                debug!("Sent {} bytes over serial", data.len());
                let record = OutboundRecord::new(data);
                let sent = record.clone();
                let _delivery = self.core.delivery();
                dispatch(self.sink.as_ref(), |s| s.on_sent(sent));
                Ok(record)
            }
            Err(message) => {
                error!("Failed to write to serial port: {}", message);
                fault(
                    &self.core,
                    self.sink.as_ref(),
                    generation,
                    DisconnectReason::WriteFailed(message.clone()),
                );
                if timed_out {
                    // The stuck write still owns a reference to the write half.
                    release_stalled_write(task).await;
                }
                self.join_reader(&mut control).await;
                Err(SessionError::WriteFailed { message })
            }
        }
    }

    /// Write `text` followed by the configured line ending
    pub async fn send_line(&self, text: &str) -> Result<OutboundRecord, SessionError> {
        let terminator = self.options.line_ending.as_bytes();
        let mut data = Vec::with_capacity(text.len() + terminator.len());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(terminator);
        self.write(&data).await
    }

    /// Stop reading, release the device and return to Closed.
    ///
    /// Idempotent. No record is delivered after this returns.
    pub async fn close(&self) {
        let mut control = self.control.lock().await;

        let previous = {
            let mut guard = self.core.state();
            let previous = std::mem::replace(&mut guard.phase, Phase::Closed);
            guard.framer.reset();
            if let Phase::Open(link) = &previous {
                link.cancel.store(true, Ordering::Release);
            }
            previous
        };

        {
            // Waits for a delivery that passed the Open check before the swap.
            let _delivery = self.core.delivery();
            if !matches!(previous, Phase::Closed) {
                dispatch(self.sink.as_ref(), |s| {
                    s.on_state_change(SessionState::Closed, None)
                });
            }
        }

        match previous {
            Phase::Open(link) => {
                release_writer(&link);
                info!("Serial session on '{}' closed", link.device);
            }
            Phase::Faulted(reason) => debug!("Cleared faulted session ({})", reason),
            Phase::Closed => {}
        }

        self.join_reader(&mut control).await;
    }

    pub fn state(&self) -> SessionState {
        self.core.state().phase.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Device held by the open session
    pub fn device(&self) -> Option<DeviceId> {
        match &self.core.state().phase {
            Phase::Open(link) => Some(link.device.clone()),
            _ => None,
        }
    }

    /// Line settings applied to the open session
    pub fn config(&self) -> Option<PortConfig> {
        match &self.core.state().phase {
            Phase::Open(link) => Some(link.config),
            _ => None,
        }
    }

    /// Why the session faulted, while it remains Faulted
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match &self.core.state().phase {
            Phase::Faulted(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    async fn join_reader(&self, control: &mut Control) {
        if let Some(task) = control.reader_task.take() {
            match tokio::time::timeout(READER_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Read worker ended abnormally: {}", e),
                Err(_) => warn!(
                    "Read worker did not stop within {:?}; detaching it",
                    READER_JOIN_TIMEOUT
                ),
            }
        }
    }
}

/// Wait for a write that outlived its bound to give the write half back
async fn release_stalled_write(task: JoinHandle<io::Result<()>>) {
    match tokio::time::timeout(STALLED_WRITE_TIMEOUT, task).await {
        Ok(_) => debug!("Stalled write returned; write half released"),
        Err(_) => warn!(
            "Stalled write did not return within {:?}; device stays busy until it does",
            STALLED_WRITE_TIMEOUT
        ),
    }
}

/// Flush what we can; errors on the way out are not reported.
fn release_writer(link: &OpenLink) {
    match link.writer.try_lock() {
        Ok(mut port) => {
            if let Err(e) = port.flush() {
                warn!("Ignoring flush error while closing '{}': {}", link.device, e);
            }
        }
        Err(_) => debug!("Writer for '{}' busy; releasing without flush", link.device),
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        let mut guard = self.core.state();
        if let Phase::Open(link) = std::mem::replace(&mut guard.phase, Phase::Closed) {
            link.cancel.store(true, Ordering::Release);
            warn!(
                "SerialSession dropped while open on '{}'; releasing device",
                link.device
            );
        }
    }
}
