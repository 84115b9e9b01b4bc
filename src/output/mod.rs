//! Line formatters for decoded readings.
//!
//! A formatter turns a [`Reading`] into one line of text. The CSV formatter
//! feeds the log sink; the text formatter produces the human-readable
//! summary printed by the binary and the status sink.

pub mod csv;
pub mod text;

use crate::reading::Reading;

pub use csv::CsvFormatter;
pub use text::TextFormatter;

/// Trait for formatting readings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading as a single line, without the trailing newline.
    fn format(&self, reading: &Reading) -> String;
}

/// Render a decimal the way it is stored: shortest exact form, always with a
/// fractional part (`3.0`, `188.05`).
pub(crate) fn decimal(value: f64) -> String {
    format!("{value:?}")
}
