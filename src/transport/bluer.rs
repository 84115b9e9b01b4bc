//! BlueZ D-Bus backend for the Tyremate link.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{DeviceHandle, NotificationStream, Transport, TransportError, TransportFuture};
use crate::mac_address::MacAddress;
use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::stream::{BoxStream, SelectAll};
use futures::{StreamExt, future};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// How often and how long to wait for GATT services after connecting.
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SERVICES_POLL_ATTEMPTS: u32 = 50;

impl From<bluer::Error> for TransportError {
    fn from(err: bluer::Error) -> Self {
        TransportError::Bluetooth(err.to_string())
    }
}

/// Something discovery learned about a device.
#[derive(Debug)]
enum Sighting {
    /// Newly seen; BlueZ may not know its name yet
    Added {
        address: MacAddress,
        name: Option<String>,
    },
    Renamed {
        address: MacAddress,
        name: String,
    },
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Found(DeviceHandle),
    /// Nameless so far; follow its property changes
    Watch(MacAddress),
    Ignore,
}

/// Name matching for one discovery round.
///
/// Advertisements often arrive before the scan response carrying the name,
/// so a device added without a name is watched until one shows up.
#[derive(Debug)]
struct DiscoveryRound<'a> {
    target_name: &'a str,
    watched: HashSet<MacAddress>,
}

impl<'a> DiscoveryRound<'a> {
    fn new(target_name: &'a str) -> Self {
        Self {
            target_name,
            watched: HashSet::new(),
        }
    }

    fn observe(&mut self, sighting: Sighting) -> Verdict {
        match sighting {
            Sighting::Added {
                address,
                name: Some(name),
            }
            | Sighting::Renamed { address, name } => {
                if name == self.target_name {
                    Verdict::Found(DeviceHandle { address, name })
                } else {
                    Verdict::Ignore
                }
            }
            Sighting::Added { address, name: None } => {
                if self.watched.insert(address) {
                    Verdict::Watch(address)
                } else {
                    Verdict::Ignore
                }
            }
        }
    }
}

/// Transport backed by the default BlueZ adapter.
pub struct BluerTransport {
    // The session must outlive the adapter proxy.
    _session: Session,
    adapter: Adapter,
}

impl BluerTransport {
    /// Open a BlueZ session and power on the default adapter.
    ///
    /// # Errors
    /// Returns [`TransportError::Bluetooth`] when bluetoothd is unreachable or
    /// no adapter is present.
    pub async fn new() -> Result<Self, TransportError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        debug!(adapter = adapter.name(), "bluetooth adapter ready");

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    fn device(&self, handle: &DeviceHandle) -> Result<Device, TransportError> {
        self.adapter
            .device(handle.address.into())
            .map_err(|_| TransportError::UnknownDevice(handle.address))
    }

    async fn discover_named(
        &self,
        target_name: &str,
        timeout: Duration,
    ) -> Result<Option<DeviceHandle>, TransportError> {
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        if let Err(e) = self.adapter.set_discovery_filter(filter).await {
            warn!(error = %e, "failed to set LE discovery filter");
        }

        // Discovery stays active only while the event stream is alive.
        let mut events = Box::pin(self.adapter.discover_devices().await?);
        let mut renames: SelectAll<BoxStream<'static, (MacAddress, String)>> = SelectAll::new();
        let mut round = DiscoveryRound::new(target_name);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let sighting = tokio::select! {
                () = &mut deadline => return Ok(None),
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        let device = self.adapter.device(address)?;
                        let name = device.name().await.unwrap_or_else(|e| {
                            debug!(%address, error = %e, "could not read device name");
                            None
                        });
                        Sighting::Added {
                            address: MacAddress::from(address),
                            name,
                        }
                    }
                    Some(_) => continue,
                    None => return Ok(None),
                },
                Some((address, name)) = renames.next() => Sighting::Renamed { address, name },
            };

            match round.observe(sighting) {
                Verdict::Found(handle) => return Ok(Some(handle)),
                Verdict::Watch(address) => {
                    debug!(%address, "device has no name yet, watching it");
                    let device = self.adapter.device(address.into())?;
                    let names = device.events().await?.filter_map(move |event| {
                        future::ready(match event {
                            DeviceEvent::PropertyChanged(DeviceProperty::Name(name)) => {
                                Some((address, name))
                            }
                            _ => None,
                        })
                    });
                    renames.push(names.boxed());
                }
                Verdict::Ignore => {}
            }
        }
    }

    async fn wait_for_services(&self, device: &Device, address: MacAddress) -> Result<(), TransportError> {
        for _ in 0..SERVICES_POLL_ATTEMPTS {
            if device.is_services_resolved().await? {
                return Ok(());
            }
            tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
        }
        Err(TransportError::ServicesUnresolved(address))
    }

    async fn find_characteristic(
        &self,
        handle: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let device = self.device(handle)?;
        self.wait_for_services(&device, handle.address).await?;

        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                if characteristic.uuid().await? == uuid {
                    return Ok(characteristic);
                }
            }
        }
        Err(TransportError::CharacteristicNotFound(uuid))
    }

    async fn connect_device(&self, handle: &DeviceHandle) -> Result<(), TransportError> {
        let device = self.device(handle)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }
        Ok(())
    }

    async fn subscribe_characteristic(
        &self,
        handle: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<NotificationStream, TransportError> {
        let device = self.device(handle)?;
        let characteristic = self.find_characteristic(handle, uuid).await?;
        let notifications = characteristic.notify().await?;

        // End the stream as soon as BlueZ reports the link as gone.
        let mut device_events = Box::pin(device.events().await?);
        let link_lost = async move {
            while let Some(event) = device_events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    break;
                }
            }
        };

        Ok(notifications.take_until(link_lost).boxed())
    }

    async fn write_characteristic(
        &self,
        handle: &DeviceHandle,
        uuid: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.find_characteristic(handle, uuid).await?;
        characteristic.write(value).await?;
        Ok(())
    }

    async fn disconnect_device(&self, handle: &DeviceHandle) -> Result<(), TransportError> {
        let device = self.device(handle)?;
        if device.is_connected().await? {
            device.disconnect().await?;
        }
        Ok(())
    }
}

impl Transport for BluerTransport {
    fn discover<'a>(
        &'a self,
        target_name: &'a str,
        timeout: Duration,
    ) -> TransportFuture<'a, Option<DeviceHandle>> {
        Box::pin(self.discover_named(target_name, timeout))
    }

    fn connect<'a>(&'a self, device: &'a DeviceHandle) -> TransportFuture<'a, ()> {
        Box::pin(self.connect_device(device))
    }

    fn subscribe<'a>(
        &'a self,
        device: &'a DeviceHandle,
        characteristic: Uuid,
    ) -> TransportFuture<'a, NotificationStream> {
        Box::pin(self.subscribe_characteristic(device, characteristic))
    }

    fn write<'a>(
        &'a self,
        device: &'a DeviceHandle,
        characteristic: Uuid,
        value: &'a [u8],
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.write_characteristic(device, characteristic, value))
    }

    fn disconnect<'a>(&'a self, device: &'a DeviceHandle) -> TransportFuture<'a, ()> {
        Box::pin(self.disconnect_device(device))
    }
}
