//! BLE transport abstraction for the Tyremate link.
//!
//! The connection state machine only talks to a [`Transport`]. The BlueZ
//! backend lives in [`bluer`]; tests drive the state machine with a
//! scripted transport instead of hardware.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by every [`Transport`] operation.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Notification payloads from a subscribed characteristic.
///
/// The stream ends when the link to the device goes away.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// A device found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub address: MacAddress,
    /// Advertised local name
    pub name: String,
}

/// Errors reported by a transport backend. All of them are recoverable from
/// the pipeline's point of view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Adapter, D-Bus or GATT level failure
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The adapter no longer knows the device
    #[error("device {0} is not known to the adapter")]
    UnknownDevice(MacAddress),
    /// GATT services resolved but the characteristic is missing
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    /// Services did not resolve after connecting
    #[error("GATT services of {0} did not resolve")]
    ServicesUnresolved(MacAddress),
}

/// Wireless capability consumed by the connection state machine.
pub trait Transport: Send + Sync {
    /// Scan for up to `timeout` and return the first device advertising
    /// exactly `target_name`, or `None` when nothing matched in time.
    fn discover<'a>(
        &'a self,
        target_name: &'a str,
        timeout: Duration,
    ) -> TransportFuture<'a, Option<DeviceHandle>>;

    fn connect<'a>(&'a self, device: &'a DeviceHandle) -> TransportFuture<'a, ()>;

    /// Enable notifications on `characteristic`.
    fn subscribe<'a>(
        &'a self,
        device: &'a DeviceHandle,
        characteristic: Uuid,
    ) -> TransportFuture<'a, NotificationStream>;

    /// Write `value` to `characteristic` with response.
    fn write<'a>(
        &'a self,
        device: &'a DeviceHandle,
        characteristic: Uuid,
        value: &'a [u8],
    ) -> TransportFuture<'a, ()>;

    /// Best-effort disconnect.
    fn disconnect<'a>(&'a self, device: &'a DeviceHandle) -> TransportFuture<'a, ()>;
}
