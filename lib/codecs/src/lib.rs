//! A collection of codecs that turn raw syslog bytes, received as datagrams
//! or as a TCP byte stream, into canonical log records.

#![deny(missing_docs)]

pub mod decoding;
mod error;
mod record;

pub use decoding::format::{decode_priority, normalize};
pub use error::{FramingError, NormalizeError};
pub use record::{LogRecord, ParseSeverityError, Severity};
