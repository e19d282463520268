//! Scripted in-memory serial devices.
//!
//! `MockTransport` stands in for the host's serial devices in tests and
//! demos: inbound data, read errors, unplugging and write failures are all
//! driven from the test through a [`MockDevice`] handle.

use crate::core::catalog::{PortCatalog, PortInfo, PortKind};
use crate::core::transport::{PortHandle, SerialTransport};
use crate::domain::config::{DeviceId, PortConfig, SessionOptions};
use crate::domain::error::SessionError;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

enum Inbound {
    Data(Vec<u8>),
    Error(io::ErrorKind, String),
    Eof,
}

#[derive(Default)]
struct DeviceState {
    inbound: VecDeque<Inbound>,
    written: Vec<u8>,
    /// Reader and writer halves currently alive
    open_halves: usize,
    busy: bool,
    reject_config: bool,
    write_error: Option<io::ErrorKind>,
    write_delay: Option<Duration>,
    applied: Vec<PortConfig>,
}

#[derive(Default)]
struct DeviceInner {
    state: Mutex<DeviceState>,
    readable: Condvar,
}

impl DeviceInner {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, item: Inbound) {
        self.lock().inbound.push_back(item);
        self.readable.notify_all();
    }

    fn release_half(&self) {
        let mut state = self.lock();
        state.open_halves = state.open_halves.saturating_sub(1);
    }
}

/// Test-side handle to a scripted device
#[derive(Clone)]
pub struct MockDevice {
    id: DeviceId,
    inner: Arc<DeviceInner>,
}

impl MockDevice {
    fn new(id: DeviceId) -> Self {
        Self {
            id,
            inner: Arc::new(DeviceInner::default()),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Queue bytes for the session to read
    pub fn push(&self, data: &[u8]) {
        if !data.is_empty() {
            self.inner.enqueue(Inbound::Data(data.to_vec()));
        }
    }

    /// Make the next read fail
    pub fn fail_read(&self, message: &str) {
        self.inner
            .enqueue(Inbound::Error(io::ErrorKind::BrokenPipe, message.to_string()));
    }

    /// Make the next read report end of stream
    pub fn end_stream(&self) {
        self.inner.enqueue(Inbound::Eof);
    }

    /// Everything written to the device so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    /// Whether any session still holds a handle to the device
    pub fn is_open(&self) -> bool {
        self.inner.lock().open_halves > 0
    }

    /// Refuse opens as if another process held the device
    pub fn set_busy(&self, busy: bool) {
        self.inner.lock().busy = busy;
    }

    /// Refuse opens as if the driver rejected the line settings
    pub fn reject_config(&self, reject: bool) {
        self.inner.lock().reject_config = reject;
    }

    /// Fail every write from now on
    pub fn fail_writes(&self) {
        self.inner.lock().write_error = Some(io::ErrorKind::BrokenPipe);
    }

    /// Block every write for `delay` before completing it
    pub fn stall_writes(&self, delay: Duration) {
        self.inner.lock().write_delay = Some(delay);
    }

    /// Configurations applied by successful opens, oldest first
    pub fn applied_configs(&self) -> Vec<PortConfig> {
        self.inner.lock().applied.clone()
    }
}

struct MockReader {
    device: Arc<DeviceInner>,
    poll: Duration,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.device.lock();
        let (mut state, _) = self
            .device
            .readable
            .wait_timeout_while(guard, self.poll, |s| s.inbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        match state.inbound.pop_front() {
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            Some(Inbound::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    state.inbound.push_front(Inbound::Data(rest));
                }
                Ok(n)
            }
            Some(Inbound::Error(kind, message)) => Err(io::Error::new(kind, message)),
            Some(Inbound::Eof) => Ok(0),
        }
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.device.release_half();
    }
}

struct MockWriter {
    device: Arc<DeviceInner>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (delay, error) = {
            let state = self.device.lock();
            (state.write_delay, state.write_error)
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(kind) = error {
            return Err(io::Error::new(kind, "mock write failure"));
        }

        self.device.lock().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.device.release_half();
    }
}

/// In-memory transport and catalog of scripted devices
#[derive(Default)]
pub struct MockTransport {
    devices: Mutex<BTreeMap<DeviceId, MockDevice>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<DeviceId, MockDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a device, or return the one already present under `id`
    pub fn add_device(&self, id: impl Into<DeviceId>) -> MockDevice {
        let id = id.into();
        self.devices()
            .entry(id.clone())
            .or_insert_with(|| MockDevice::new(id))
            .clone()
    }

    pub fn device(&self, id: &DeviceId) -> Option<MockDevice> {
        self.devices().get(id).cloned()
    }

    /// Unplug a device; an open session sees end of stream
    pub fn remove_device(&self, id: &DeviceId) -> Option<MockDevice> {
        let device = self.devices().remove(id)?;
        device.end_stream();
        Some(device)
    }
}

impl SerialTransport for MockTransport {
    fn open(
        &self,
        device: &DeviceId,
        config: &PortConfig,
        options: &SessionOptions,
    ) -> Result<PortHandle, SessionError> {
        let mock = self
            .device(device)
            .ok_or_else(|| SessionError::DeviceUnavailable {
                device: device.to_string(),
                message: "No such device".to_string(),
            })?;

        let mut state = mock.inner.lock();
        if state.busy || state.open_halves > 0 {
            return Err(SessionError::DeviceUnavailable {
                device: device.to_string(),
                message: "Device or resource busy".to_string(),
            });
        }
        if state.reject_config {
            return Err(SessionError::ConfigRejected {
                device: device.to_string(),
                message: format!("driver refused {}", config),
            });
        }

        // Bytes that arrived while nobody was listening are gone.
        state.inbound.clear();
        state.applied.push(*config);
        state.open_halves = 2;
        drop(state);

        Ok(PortHandle {
            reader: Box::new(MockReader {
                device: Arc::clone(&mock.inner),
                poll: options.read_poll(),
            }),
            writer: Box::new(MockWriter {
                device: Arc::clone(&mock.inner),
            }),
        })
    }
}

impl PortCatalog for MockTransport {
    fn list_port_details(&self) -> Vec<PortInfo> {
        self.devices()
            .keys()
            .map(|id| PortInfo::new(id.clone(), PortKind::Unknown))
            .collect()
    }
}
