//! Sink configuration file and command-line value parsers.
//!
//! The configuration file is plain JSON:
//!
//! ```json
//! {
//!   "separator": ";",
//!   "fields": { "pressure": true, "temperature": true, "battery": false,
//!               "datetime": true, "raw": false },
//!   "persistence_enabled": true,
//!   "log_enabled": false
//! }
//! ```
//!
//! Every key is optional. A missing file is the same as an empty object.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

pub const DEFAULT_SEPARATOR: &str = "|";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Presentation and routing settings handed to the sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Joins the visual-code payload fields
    pub separator: String,
    pub fields: EnabledFields,
    pub persistence_enabled: bool,
    pub log_enabled: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            fields: EnabledFields::default(),
            persistence_enabled: true,
            log_enabled: false,
        }
    }
}

impl SinkConfig {
    /// Load the configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file exists but cannot be read or is
    /// not valid JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Which reading fields go into the visual-code payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnabledFields {
    pub datetime: bool,
    pub pressure: bool,
    pub temperature: bool,
    pub battery: bool,
    pub raw: bool,
}

/// Optional payload fields, in the order they are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Pressure,
    Temperature,
    Battery,
    Datetime,
    Raw,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Pressure,
        Field::Temperature,
        Field::Battery,
        Field::Datetime,
        Field::Raw,
    ];
}

impl EnabledFields {
    pub fn is_enabled(&self, field: Field) -> bool {
        match field {
            Field::Pressure => self.pressure,
            Field::Temperature => self.temperature,
            Field::Battery => self.battery,
            Field::Datetime => self.datetime,
            Field::Raw => self.raw,
        }
    }

    /// Enabled fields in payload order.
    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.is_enabled(*f))
    }
}

type UnitFn = fn(u64) -> Option<Duration>;

// "ms" must be tried before "m" and "s".
const DURATION_UNITS: [(&str, UnitFn); 4] = [
    ("ms", millis),
    ("h", hours),
    ("m", minutes),
    ("s", seconds),
];

fn millis(n: u64) -> Option<Duration> {
    Some(Duration::from_millis(n))
}

fn seconds(n: u64) -> Option<Duration> {
    Some(Duration::from_secs(n))
}

fn minutes(n: u64) -> Option<Duration> {
    n.checked_mul(60).map(Duration::from_secs)
}

fn hours(n: u64) -> Option<Duration> {
    n.checked_mul(3600).map(Duration::from_secs)
}

/// Parse a human-readable duration such as `3s`, `500ms`, `1m` or `2h`.
///
/// A bare number is read as seconds.
///
/// # Examples
///
/// ```
/// use tyremate_listener::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, to_duration) = DURATION_UNITS
        .iter()
        .find_map(|&(suffix, f)| src.strip_suffix(suffix).map(|n| (n.trim(), f)))
        .unwrap_or((src, seconds as UnitFn));

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    to_duration(value).ok_or_else(|| format!("duration out of range: {src}"))
}
