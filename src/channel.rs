//! Reading channel: the only crossing point between the link task and
//! consumers.
//!
//! Every subscriber owns an unbounded queue, so publishing never waits on a
//! slow consumer and never drops an event. Events published while nobody is
//! subscribed are kept in a backlog and handed, in order, to the next
//! subscriber.

use crate::decoder::DecodeError;
use crate::link::LinkPhase;
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Everything that travels from the link task to consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Reading(Reading),
    Status(StatusEvent),
}

/// Human-readable lifecycle and error notices for presentation.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Run `run` of the controller began
    ScanStarted { run: u64 },
    /// A discovery round is starting; `attempt` counts from 1 since the last
    /// successful subscription.
    Scanning { attempt: u32 },
    DeviceFound { address: MacAddress },
    DeviceNotFound,
    Connected { address: MacAddress },
    /// Connect, subscribe or start command failed
    LinkFailed { reason: String },
    /// The device went away while subscribed
    LinkDropped,
    DecodeFailed { error: DecodeError },
    PhaseChanged { phase: LinkPhase, retry_count: u32 },
    /// A sink refused a reading; acquisition carries on
    SinkFailed { sink: &'static str, reason: String },
    /// Last event of run `run`
    ScanStopped { run: u64 },
}

impl StatusEvent {
    /// Whether the event describes something that went wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound
                | Self::LinkFailed { .. }
                | Self::LinkDropped
                | Self::DecodeFailed { .. }
                | Self::SinkFailed { .. }
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanStarted { .. } => write!(f, "Starting scan..."),
            Self::Scanning { attempt } => write!(f, "Scanning (attempt {attempt})"),
            Self::DeviceFound { address } => write!(f, "Found device {address}"),
            Self::DeviceNotFound => write!(f, "Device not found. Retrying..."),
            Self::Connected { address } => write!(f, "Connected to {address}, streaming"),
            Self::LinkFailed { reason } => write!(f, "Connection error: {reason}"),
            Self::LinkDropped => write!(f, "Link lost. Reconnecting..."),
            Self::DecodeFailed { error } => write!(f, "Dropped notification: {error}"),
            Self::PhaseChanged { phase, retry_count } => {
                write!(f, "Link {phase} (retries: {retry_count})")
            }
            Self::SinkFailed { sink, reason } => write!(f, "{sink} sink error: {reason}"),
            Self::ScanStopped { .. } => write!(f, "Scan stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    subscribers: Vec<mpsc::UnboundedSender<PipelineEvent>>,
    backlog: VecDeque<PipelineEvent>,
}

/// Ordered fan-out of [`PipelineEvent`]s. Cloning yields another handle to
/// the same channel.
#[derive(Debug, Clone, Default)]
pub struct ReadingChannel {
    shared: Arc<Mutex<Shared>>,
}

impl ReadingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // The critical sections never panic halfway through, so the data
        // behind a poisoned lock is still consistent.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a consumer. It receives any backlog first, then every event
    /// published from now on, in publish order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        for event in shared.backlog.drain(..) {
            // rx is alive, send cannot fail here
            let _ = tx.send(event);
        }
        shared.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber without waiting.
    pub fn publish(&self, event: PipelineEvent) {
        let mut shared = self.lock();
        shared.subscribers.retain(|tx| !tx.is_closed());

        let mut delivered = false;
        for tx in &shared.subscribers {
            delivered |= tx.send(event.clone()).is_ok();
        }
        if !delivered {
            shared.backlog.push_back(event);
        }
    }

    pub fn publish_reading(&self, reading: Reading) {
        self.publish(PipelineEvent::Reading(reading));
    }

    pub fn publish_status(&self, status: StatusEvent) {
        self.publish(PipelineEvent::Status(status));
    }

    /// Number of subscribers whose receiver is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Number of events waiting for a first subscriber.
    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }
}
