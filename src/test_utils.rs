use crate::channel::StatusEvent;
use crate::config::SinkConfig;
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use crate::sink::{LogSink, PersistenceSink, SinkError, StatusSink, VisualCodeSink};
use crate::transport::{DeviceHandle, NotificationStream, Transport, TransportError, TransportFuture};
use futures::StreamExt;
use futures::channel::mpsc as notify_mpsc;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// A stable device address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xC4, 0x7C, 0x8D, 0x6A, 0x01, 0xFF]);

/// Frame with sensor id `1234`, 188.05 PSI, 48 °C and 3.0 V.
pub fn sample_payload() -> Vec<u8> {
    vec![0xA1, 0x12, 0x34, 0x00, 0x00, 0x05, 0x78, 0x64, 0x96, 0xEE]
}

/// [`sample_payload`] with a different sensor id.
pub fn payload_with_sensor(id: u16) -> Vec<u8> {
    let mut payload = sample_payload();
    payload[1..3].copy_from_slice(&id.to_be_bytes());
    payload
}

/// The device a scripted discovery normally finds.
pub fn target_device() -> DeviceHandle {
    DeviceHandle {
        address: TEST_MAC,
        name: crate::link::DEFAULT_TARGET_NAME.to_string(),
    }
}

#[derive(Default)]
struct Script {
    discoveries: VecDeque<Option<DeviceHandle>>,
    connects: VecDeque<Result<(), TransportError>>,
    subscribes: VecDeque<Result<(), TransportError>>,
    writes: VecDeque<Result<(), TransportError>>,
    connect_hangs: bool,
    disconnect_hangs: bool,
}

#[derive(Default)]
struct Calls {
    discoveries: usize,
    connects: usize,
    disconnects: usize,
    subscriptions: Vec<Uuid>,
    writes: Vec<(Uuid, Vec<u8>)>,
}

/// Scripted [`Transport`] for driving the link without hardware.
///
/// Every operation pops the next scripted result and succeeds once its
/// script runs out. Discovery with nothing scripted behaves like an empty
/// radio: it waits for the whole timeout and finds nothing.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
    notifiers: Mutex<Vec<notify_mpsc::UnboundedSender<Vec<u8>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_discoveries(&self, results: impl IntoIterator<Item = Option<DeviceHandle>>) {
        self.script.lock().unwrap().discoveries.extend(results);
    }

    pub fn script_connects(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.script.lock().unwrap().connects.extend(results);
    }

    pub fn script_subscribes(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.script.lock().unwrap().subscribes.extend(results);
    }

    pub fn script_writes(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.script.lock().unwrap().writes.extend(results);
    }

    /// Make every connect wait forever.
    pub fn hang_on_connect(&self) {
        self.script.lock().unwrap().connect_hangs = true;
    }

    /// Make every disconnect wait forever.
    pub fn hang_on_disconnect(&self) {
        self.script.lock().unwrap().disconnect_hangs = true;
    }

    /// Push a notification to every open subscription.
    pub fn notify(&self, payload: Vec<u8>) {
        for tx in self.notifiers.lock().unwrap().iter() {
            let _ = tx.unbounded_send(payload.clone());
        }
    }

    /// End every open notification stream, as a remote disconnect would.
    pub fn drop_link(&self) {
        self.notifiers.lock().unwrap().clear();
    }

    pub fn discoveries(&self) -> usize {
        self.calls.lock().unwrap().discoveries
    }

    pub fn connects(&self) -> usize {
        self.calls.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.calls.lock().unwrap().disconnects
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().subscriptions.clone()
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.calls.lock().unwrap().writes.clone()
    }
}

impl Transport for FakeTransport {
    fn discover<'a>(
        &'a self,
        _target_name: &'a str,
        timeout: Duration,
    ) -> TransportFuture<'a, Option<DeviceHandle>> {
        self.calls.lock().unwrap().discoveries += 1;
        let scripted = self.script.lock().unwrap().discoveries.pop_front();
        Box::pin(async move {
            match scripted {
                Some(found) => Ok(found),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        })
    }

    fn connect<'a>(&'a self, _device: &'a DeviceHandle) -> TransportFuture<'a, ()> {
        self.calls.lock().unwrap().connects += 1;
        let (hangs, result) = {
            let mut script = self.script.lock().unwrap();
            (script.connect_hangs, script.connects.pop_front())
        };
        Box::pin(async move {
            if hangs {
                std::future::pending::<()>().await;
            }
            result.unwrap_or(Ok(()))
        })
    }

    fn subscribe<'a>(
        &'a self,
        _device: &'a DeviceHandle,
        characteristic: Uuid,
    ) -> TransportFuture<'a, NotificationStream> {
        self.calls.lock().unwrap().subscriptions.push(characteristic);
        let result = self.script.lock().unwrap().subscribes.pop_front();
        Box::pin(async move {
            result.unwrap_or(Ok(()))?;
            let (tx, rx) = notify_mpsc::unbounded();
            self.notifiers.lock().unwrap().push(tx);
            Ok(rx.boxed())
        })
    }

    fn write<'a>(
        &'a self,
        _device: &'a DeviceHandle,
        characteristic: Uuid,
        value: &'a [u8],
    ) -> TransportFuture<'a, ()> {
        self.calls
            .lock()
            .unwrap()
            .writes
            .push((characteristic, value.to_vec()));
        let result = self.script.lock().unwrap().writes.pop_front();
        Box::pin(async move { result.unwrap_or(Ok(())) })
    }

    fn disconnect<'a>(&'a self, _device: &'a DeviceHandle) -> TransportFuture<'a, ()> {
        self.calls.lock().unwrap().disconnects += 1;
        let hangs = self.script.lock().unwrap().disconnect_hangs;
        Box::pin(async move {
            if hangs {
                std::future::pending::<()>().await;
            }
            self.drop_link();
            Ok(())
        })
    }
}

#[derive(Default)]
struct Recorded {
    calls: Vec<String>,
    statuses: Vec<StatusEvent>,
    fail_render: bool,
    fail_store: bool,
    panic_next_render: bool,
}

/// Implements every sink trait and records what it was handed.
///
/// Rendering "produces" `codes/sensor_<ID>.txt` without touching the disk.
/// Status events only count failures, to keep assertions short.
#[derive(Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

fn path_label(path: Option<&Path>) -> String {
    path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
}

fn refused() -> SinkError {
    SinkError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "refused"))
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_render(&self) {
        self.inner.lock().unwrap().fail_render = true;
    }

    /// Make the next render panic instead of returning.
    pub fn panic_next_render(&self) {
        self.inner.lock().unwrap().panic_next_render = true;
    }

    pub fn fail_store(&self) {
        self.inner.lock().unwrap().fail_store = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Failure notices received so far.
    pub fn statuses(&self) -> Vec<StatusEvent> {
        self.inner.lock().unwrap().statuses.clone()
    }

    /// Sensor ids of the readings that reached the status sink, in order.
    pub fn summarised(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("reading "))
            .filter_map(|rest| rest.split(' ').next())
            .map(str::to_string)
            .collect()
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

impl VisualCodeSink for RecordingSink {
    fn render(&self, reading: &Reading, _config: &SinkConfig) -> Result<PathBuf, SinkError> {
        self.record(format!("render {}", reading.sensor_id()));
        let panics = std::mem::take(&mut self.inner.lock().unwrap().panic_next_render);
        if panics {
            panic!("render exploded on {}", reading.sensor_id());
        }
        if self.inner.lock().unwrap().fail_render {
            return Err(refused());
        }
        Ok(PathBuf::from(format!("codes/sensor_{}.txt", reading.sensor_id())))
    }
}

impl PersistenceSink for RecordingSink {
    fn store(&self, reading: &Reading, code_path: Option<&Path>) -> Result<(), SinkError> {
        self.record(format!("store {} {}", reading.sensor_id(), path_label(code_path)));
        if self.inner.lock().unwrap().fail_store {
            return Err(refused());
        }
        Ok(())
    }
}

impl LogSink for RecordingSink {
    fn append(&self, reading: &Reading) -> Result<(), SinkError> {
        self.record(format!("append {}", reading.sensor_id()));
        Ok(())
    }
}

impl StatusSink for RecordingSink {
    fn status(&self, event: &StatusEvent) {
        if event.is_failure() {
            self.inner.lock().unwrap().statuses.push(event.clone());
        }
    }

    fn reading(&self, reading: &Reading, code_path: Option<&Path>) {
        self.record(format!("reading {} {}", reading.sensor_id(), path_label(code_path)));
    }
}
