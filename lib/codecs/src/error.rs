/// An error that occurred while producing byte frames from a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The underlying transport failed while reading.
    #[error("read frame failed, {0}")]
    Io(#[from] std::io::Error),
}

/// An error that stops a raw message from being parsed as text at all.
///
/// It never leaves `normalize`, which turns it into an error record.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The payload carries a NUL byte, so it is binary data.
    #[error("message is binary, NUL at offset {offset}")]
    Binary {
        /// Byte offset of the first NUL in the payload.
        offset: usize,
    },
}
