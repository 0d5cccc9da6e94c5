use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::FramingError;

/// A codec for handling bytes that are delimited by newlines.
///
/// A `\r` right before the delimiter is dropped, and blank lines produce no
/// frame. An unterminated tail is emitted when the stream ends.
#[derive(Clone, Debug)]
pub struct NewlineDelimitedDecoder {
    max_length: usize,
    /// Where to resume searching, so a long partial line is scanned once.
    next_index: usize,
    /// Set while skipping the rest of an overlong frame.
    discarding: bool,
}

impl NewlineDelimitedDecoder {
    /// Creates a new `NewlineDelimitedDecoder`.
    pub const fn new() -> Self {
        Self::new_with_max_length(usize::MAX)
    }

    /// Creates a `NewlineDelimitedDecoder` with a maximum frame length limit.
    ///
    /// Any frames longer than `max_length` bytes will be discarded entirely.
    /// A partial frame is dropped as soon as it grows past `max_length`.
    pub const fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn log_discard(&self, len: usize) {
        if !self.discarding {
            warn!(
                message = "Discarding frame larger than max_length",
                max_length = self.max_length,
                buffered = len,
            );
        }
    }
}

impl Default for NewlineDelimitedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_cr(mut frame: BytesMut) -> Bytes {
    if frame.last() == Some(&b'\r') {
        frame.truncate(frame.len() - 1);
    }

    frame.freeze()
}

impl Decoder for NewlineDelimitedDecoder {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = memchr::memchr(b'\n', &src[self.next_index..]) else {
                if src.len() > self.max_length {
                    self.log_discard(src.len());
                    self.discarding = true;
                    src.clear();
                }

                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset);
            src.advance(1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let frame = strip_cr(line);
            if frame.len() > self.max_length {
                self.log_discard(frame.len());
                continue;
            }

            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if std::mem::take(&mut self.discarding) {
            buf.clear();
            return Ok(None);
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let frame = strip_cr(buf.split());
        Ok((!frame.is_empty()).then_some(frame))
    }
}
