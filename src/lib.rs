//! `tyremate-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signal
//! handling and process exit codes. Acquisition lives in
//! [`crate::controller`], which drives the [`crate::link`] state machine over
//! an injected [`crate::transport::Transport`] and dispatches readings to
//! [`crate::sink`]s, so all of it can be tested without Bluetooth hardware.

pub mod app;
pub mod channel;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod link;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use channel::{PipelineEvent, ReadingChannel, StatusEvent};
pub use config::{ConfigError, EnabledFields, SinkConfig, parse_duration};
pub use controller::{AcquisitionController, StopReport};
pub use decoder::{DecodeError, MIN_FRAME_LEN, decode};
pub use link::{LinkConfig, LinkPhase, LinkState, RetryPolicy};
pub use mac_address::MacAddress;
pub use output::{CsvFormatter, OutputFormatter, TextFormatter};
pub use reading::Reading;
pub use sink::{SinkError, Sinks};
pub use transport::{DeviceHandle, Transport, TransportError};
