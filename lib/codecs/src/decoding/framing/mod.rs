//! A collection of framing methods that split a TCP byte stream into
//! syslog messages.

mod bytes;
mod newline;

use ::bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub use self::bytes::BytesDecoder;
pub use newline::NewlineDelimitedDecoder;

use crate::FramingError;

/// How message boundaries are found in a stream.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingConfig {
    /// Every read from the socket is one message, whatever it contains.
    Bytes,

    /// Messages are terminated by `\n`, an optional `\r` before it is dropped.
    #[default]
    Newline,
}

impl FramingConfig {
    /// Build the `Framer` from this configuration. `max_length` bounds a
    /// newline delimited frame, a single read is bounded already.
    pub fn build(&self, max_length: usize) -> Framer {
        match self {
            FramingConfig::Bytes => Framer::Bytes(BytesDecoder::new()),
            FramingConfig::Newline => Framer::NewlineDelimited(
                NewlineDelimitedDecoder::new_with_max_length(max_length),
            ),
        }
    }
}

/// Produce byte frames from a byte stream.
#[derive(Clone, Debug)]
pub enum Framer {
    /// Uses a `BytesDecoder` for framing.
    Bytes(BytesDecoder),
    /// Uses a `NewlineDelimitedDecoder` for framing.
    NewlineDelimited(NewlineDelimitedDecoder),
}

impl tokio_util::codec::Decoder for Framer {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Framer::Bytes(f) => f.decode(src),
            Framer::NewlineDelimited(f) => f.decode(src),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Framer::Bytes(f) => f.decode_eof(buf),
            Framer::NewlineDelimited(f) => f.decode_eof(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_config() {
        let config: FramingConfig = serde_yaml::from_str("bytes").unwrap();
        assert_eq!(config, FramingConfig::Bytes);

        let config: FramingConfig = serde_yaml::from_str("newline").unwrap();
        assert_eq!(config, FramingConfig::Newline);

        assert!(serde_yaml::from_str::<FramingConfig>("octet_counting").is_err());
        assert_eq!(FramingConfig::default(), FramingConfig::Newline);
    }
}
