//! Newline-delimited framing with a size cap.
//!
//! Drives [`AnyDelimiterCodec`] by hand instead of through `FramedRead`,
//! which ends its stream after any decode error. Here an oversized line is
//! reported once, discarded, and reading carries on with the next line.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

/// Reads `\n`-terminated lines of at most `max_bytes` from `R`.
pub struct LineReader<R> {
    reader: R,
    codec: AnyDelimiterCodec,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            reader,
            codec: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_bytes),
            buf: BytesMut::with_capacity(8 * 1024),
            eof: false,
        }
    }

    /// The next line without its terminator, or `None` at end of input.
    ///
    /// A line over the limit yields `MaxChunkLengthExceeded`; its bytes are
    /// dropped and the following call returns the line after it. A trailing
    /// line without a terminator is returned at end of input. Cancel safe.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, AnyDelimiterCodecError> {
        loop {
            if let Some(line) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
                return self.codec.decode_eof(&mut self.buf);
            }
        }
    }
}
