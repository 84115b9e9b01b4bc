//! Connection state machine for the Tyremate link.
//!
//! Drives one device through discovery, connect, subscribe and hold, and
//! falls back to discovery whenever anything goes wrong. "Not found yet" and
//! "dropped" share the same retry path and there is no attempt limit: only a
//! stop request ends a run.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Subscribed
//!            ^   |         |             |
//!            +---+---------+-------------+   (miss, failure, drop)
//! Scanning | Connecting | Subscribed -> Disconnecting -> Stopped   (stop)
//! ```

use crate::channel::{ReadingChannel, StatusEvent};
use crate::decoder::decode;
use crate::mac_address::MacAddress;
use crate::transport::{DeviceHandle, NotificationStream, Transport, TransportError};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Advertised name of the sensor.
pub const DEFAULT_TARGET_NAME: &str = "Tyremate";

/// Characteristic the sensor pushes frames on.
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x9e1547ba_c365_57b5_2947_c5e1c1e1d528);

/// Characteristic that accepts the start command.
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x2d86686a_53dc_25b3_0c4a_f0e10c8dee20);

/// Command that makes the sensor start streaming.
pub const START_STREAMING_COMMAND: [u8; 1] = [0xA5];

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle phase of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Subscribed,
    Disconnecting,
    Stopped,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Disconnecting => "disconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Mutable state of one pipeline run. Only the state machine writes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkState {
    pub phase: LinkPhase,
    /// Device of the current attempt (Connecting onward), cleared on retry
    pub target_address: Option<MacAddress>,
    /// Passes through the retry path since the last successful subscribe
    pub retry_count: u32,
}

impl LinkState {
    /// State reported when a run had to be aborted instead of torn down.
    pub fn stopped() -> Self {
        Self {
            phase: LinkPhase::Stopped,
            ..Self::default()
        }
    }
}

/// Device identity and timing for one controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub target_name: String,
    pub notify_characteristic: Uuid,
    pub write_characteristic: Uuid,
    pub start_command: Vec<u8>,
    /// How long one discovery round listens before giving up
    pub discovery_timeout: Duration,
    /// Upper bound on the best-effort disconnect
    pub teardown_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            notify_characteristic: NOTIFY_CHARACTERISTIC,
            write_characteristic: WRITE_CHARACTERISTIC,
            start_command: START_STREAMING_COMMAND.to_vec(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

/// Delay between attempts. Attempts themselves are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry straight away (tests)
    Immediate,
    Fixed(Duration),
    /// Double the delay on every consecutive retry, capped at `max`
    Backoff { initial: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Delay to wait after the `retry_count`-th consecutive failure (1-based).
    pub fn delay(&self, retry_count: u32) -> Duration {
        match *self {
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Backoff { initial, max } => {
                let exponent = retry_count.saturating_sub(1).min(31);
                initial
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Why an acquisition attempt ended.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("target device not found")]
    NotFound,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("link dropped by the device")]
    Dropped,
}

/// Owns the link state and the device handle for one run.
pub struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    retry: RetryPolicy,
    events: ReadingChannel,
    state: LinkState,
    device: Option<DeviceHandle>,
}

impl ConnectionStateMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        retry: RetryPolicy,
        events: ReadingChannel,
    ) -> Self {
        Self {
            transport,
            config,
            retry,
            events,
            state: LinkState::default(),
            device: None,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Run until `stop` flips to `true` (or its sender goes away), then tear
    /// the link down and return the final state.
    ///
    /// The stop signal is raced against every await point, so an in-flight
    /// discovery, connect or notification wait is abandoned rather than
    /// awaited to completion.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> LinkState {
        self.set_phase(LinkPhase::Scanning);

        tokio::select! {
            biased;
            () = wait_for_stop(&mut stop) => debug!("stop requested"),
            () = self.acquire_forever() => {}
        }

        self.teardown().await;
        self.state
    }

    async fn acquire_forever(&mut self) {
        loop {
            let error = match self.attempt().await {
                Ok(()) => LinkError::Dropped,
                Err(error) => error,
            };
            self.recover(error).await;
        }
    }

    /// One pass: discover, connect, subscribe, then hold until the
    /// notification stream ends.
    async fn attempt(&mut self) -> Result<(), LinkError> {
        self.events.publish_status(StatusEvent::Scanning {
            attempt: self.state.retry_count + 1,
        });

        let device = self
            .transport
            .discover(&self.config.target_name, self.config.discovery_timeout)
            .await?
            .filter(|device| device.name == self.config.target_name)
            .ok_or(LinkError::NotFound)?;

        info!(address = %device.address, "found {}", device.name);
        self.events.publish_status(StatusEvent::DeviceFound {
            address: device.address,
        });
        self.state.target_address = Some(device.address);
        self.device = Some(device.clone());
        self.set_phase(LinkPhase::Connecting);

        let mut notifications = self.establish(&device).await?;

        self.state.retry_count = 0;
        self.set_phase(LinkPhase::Subscribed);
        self.events.publish_status(StatusEvent::Connected {
            address: device.address,
        });

        while let Some(payload) = notifications.next().await {
            self.handle_notification(&payload);
        }
        Ok(())
    }

    /// Connect, subscribe and send the start command. All three must succeed.
    async fn establish(&self, device: &DeviceHandle) -> Result<NotificationStream, TransportError> {
        self.transport.connect(device).await?;
        let notifications = self
            .transport
            .subscribe(device, self.config.notify_characteristic)
            .await?;
        self.transport
            .write(
                device,
                self.config.write_characteristic,
                &self.config.start_command,
            )
            .await?;
        Ok(notifications)
    }

    fn handle_notification(&self, payload: &[u8]) {
        match decode(payload) {
            Ok(reading) => {
                debug!(
                    sensor = reading.sensor_id(),
                    psi = reading.pressure_psi(),
                    raw = reading.raw_hex(),
                    "notification decoded"
                );
                self.events.publish_reading(reading);
            }
            Err(error) => {
                warn!(%error, "dropping notification");
                self.events
                    .publish_status(StatusEvent::DecodeFailed { error });
            }
        }
    }

    /// Shared retry path for misses, failures and drops.
    async fn recover(&mut self, error: LinkError) {
        match &error {
            LinkError::NotFound => {
                debug!(target = %self.config.target_name, "device not found");
                self.events.publish_status(StatusEvent::DeviceNotFound);
            }
            LinkError::Transport(e) => {
                warn!(error = %e, phase = %self.state.phase, "link attempt failed");
                self.events.publish_status(StatusEvent::LinkFailed {
                    reason: e.to_string(),
                });
            }
            LinkError::Dropped => {
                warn!("link dropped");
                self.events.publish_status(StatusEvent::LinkDropped);
            }
        }

        self.release_device().await;
        self.state.target_address = None;
        self.state.retry_count = self.state.retry_count.saturating_add(1);
        self.set_phase(LinkPhase::Scanning);

        let delay = self.retry.delay(self.state.retry_count);
        if delay.is_zero() {
            // Keep the stop branch reachable between instant retries.
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    /// Best-effort, time-bounded disconnect of the current device, if any.
    async fn release_device(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        let disconnect = self.transport.disconnect(&device);
        match tokio::time::timeout(self.config.teardown_timeout, disconnect).await {
            Ok(Ok(())) => debug!(address = %device.address, "disconnected"),
            Ok(Err(e)) => warn!(address = %device.address, error = %e, "disconnect failed"),
            Err(_) => warn!(address = %device.address, "disconnect timed out"),
        }
    }

    async fn teardown(&mut self) {
        self.set_phase(LinkPhase::Disconnecting);
        self.release_device().await;
        self.set_phase(LinkPhase::Stopped);
    }

    fn set_phase(&mut self, phase: LinkPhase) {
        if self.state.phase == phase {
            return;
        }
        info!(
            from = %self.state.phase,
            to = %phase,
            retry_count = self.state.retry_count,
            "link phase changed"
        );
        self.state.phase = phase;
        self.events.publish_status(StatusEvent::PhaseChanged {
            phase,
            retry_count: self.state.retry_count,
        });
    }
}

/// Resolves once stop is requested or the controller is gone.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
