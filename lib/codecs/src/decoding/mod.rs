//! A collection of support structures that are used in the process of decoding
//! raw syslog bytes into records.

pub mod format;
pub mod framing;

pub use framing::{BytesDecoder, Framer, FramingConfig, NewlineDelimitedDecoder};
