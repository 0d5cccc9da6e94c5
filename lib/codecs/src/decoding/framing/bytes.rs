use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::FramingError;

/// Hands out whatever a single read put in the buffer as one frame.
///
/// A message split over several TCP segments becomes several frames, and
/// several messages in one segment become one frame.
#[derive(Clone, Debug, Default)]
pub struct BytesDecoder;

impl BytesDecoder {
    /// Creates a new `BytesDecoder`.
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for BytesDecoder {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        Ok(Some(src.split().freeze()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode(buf)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[test]
    fn decode() {
        let mut input = BytesMut::from("<34>one\n<34>two");
        let mut decoder = BytesDecoder::new();

        assert_eq!(decoder.decode(&mut input).unwrap().unwrap(), "<34>one\n<34>two");
        assert_eq!(decoder.decode(&mut input).unwrap(), None);
        assert_eq!(decoder.decode_eof(&mut input).unwrap(), None);
    }

    #[tokio::test]
    async fn decode_frame_reader() {
        let input: &[u8] = b"foo bar";
        let mut reader = FramedRead::new(input, BytesDecoder::new());

        assert_eq!(reader.next().await.unwrap().unwrap(), "foo bar");
        assert!(reader.next().await.is_none());
    }
}
