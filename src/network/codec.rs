use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::util::errors::{ChatError, Result};

/// One decoded line of the peer/server channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// A line over the limit was skipped
    Oversize,
}

/// Newline-delimited framing with a maximum line length. Oversize lines are
/// discarded and surfaced as `Line::Oversize`, so the stream stays usable.
#[derive(Debug, Clone)]
pub struct BoundedLinesCodec {
    inner: LinesCodec,
}

impl BoundedLinesCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_len),
        }
    }

    fn lift(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<Line>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Line::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::Oversize)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for BoundedLinesCodec {
    type Item = Line;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Line>, Self::Error> {
        Self::lift(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Line>, Self::Error> {
        Self::lift(self.inner.decode_eof(buf))
    }
}

impl<T: AsRef<str>> Encoder<T> for BoundedLinesCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        self.inner.encode(line, buf)
    }
}

/// Validate an outgoing frame against the size limit.
pub fn check_frame_len(frame: &str, max_frame_len: usize) -> Result<()> {
    if frame.len() > max_frame_len {
        return Err(ChatError::FrameTooLarge {
            len: frame.len(),
            max: max_frame_len,
        });
    }
    Ok(())
}

/// Encode a datagram frame, rejecting anything over the limit.
pub fn encode_datagram(frame: &str, max_frame_len: usize) -> Result<Vec<u8>> {
    check_frame_len(frame, max_frame_len)?;
    Ok(frame.as_bytes().to_vec())
}

/// Decode a received datagram. `bytes` may be one byte longer than the
/// limit; receivers size their buffer that way so truncation is detectable.
pub fn decode_datagram(bytes: &[u8], max_frame_len: usize) -> Result<String> {
    if bytes.len() > max_frame_len {
        return Err(ChatError::FrameTooLarge {
            len: bytes.len(),
            max: max_frame_len,
        });
    }

    if bytes.is_empty() {
        return Err(ChatError::MalformedFrame("empty datagram".to_string()));
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|e| ChatError::MalformedFrame(format!("datagram is not UTF-8: {}", e)))?;

    Ok(text.trim_end_matches('\0').to_string())
}
