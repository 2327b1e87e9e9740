//! Buffered Framed Reader (spec §4.2).
//!
//! Turns a stream of socket reads into a stream of complete frames. The
//! reader never double-buffers within a frame: it grows a single backing
//! `Vec<u8>` by `len(chunk)` per socket read and advances a cursor when a
//! frame is consumed, compacting only once the cursor passes the halfway
//! mark. Two framing strategies are supported: length-prefixed and
//! delimiter/predicate (see [`FramedReader::next_length_prefixed`] and
//! [`FramedReader::next_delimited`]).

use crate::error::{GatewayError, GatewayResult};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A single complete protocol message, borrowed from the reader's internal
/// buffer for the duration of the call that produced it.
pub type Frame = Vec<u8>;

pub struct FramedReader<R> {
    reader: R,
    buf: Vec<u8>,
    cursor: usize,
    max_size: usize,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R, max_size: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
            cursor: 0,
            max_size,
        }
    }

    /// Bytes currently buffered but not yet consumed by a returned frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn compact(&mut self) {
        if self.cursor > self.buf.len() / 2 {
            self.buf.drain(0..self.cursor);
            self.cursor = 0;
        }
    }

    async fn read_more(&mut self) -> GatewayResult<()> {
        if self.buf.len() >= self.max_size {
            return Err(GatewayError::protocol_error(format!(
                "frame buffer exceeded hard cap of {} bytes",
                self.max_size
            )));
        }
        let mut chunk = [0u8; 8192];
        let n = self
            .reader
            .read(&mut chunk)
            .await
            .map_err(GatewayError::from)?;
        if n == 0 {
            return Err(GatewayError::network(
                "peer closed the connection before a complete frame was received",
            ));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn ensure(&mut self, needed_from_cursor: usize) -> GatewayResult<()> {
        while self.pending_len() < needed_from_cursor {
            if self.cursor + needed_from_cursor > self.max_size {
                return Err(GatewayError::protocol_error(format!(
                    "declared frame length {needed_from_cursor} exceeds hard cap of {} bytes",
                    self.max_size
                )));
            }
            self.read_more().await?;
        }
        Ok(())
    }

    /// Read a length-prefixed frame.
    ///
    /// `header_len` is the number of bytes the header occupies. `parse_len`
    /// receives exactly those header bytes and returns the *total* frame
    /// length (header included). The returned frame is the full
    /// `total_len` slice starting at the header; any bytes beyond it
    /// remain buffered for the next call.
    pub async fn next_length_prefixed(
        &mut self,
        header_len: usize,
        parse_len: impl Fn(&[u8]) -> GatewayResult<usize>,
    ) -> GatewayResult<Frame> {
        self.ensure(header_len).await?;
        let header = &self.buf[self.cursor..self.cursor + header_len];
        let total_len = parse_len(header)?;
        if total_len < header_len {
            return Err(GatewayError::protocol_error(
                "declared frame length is shorter than its own header",
            ));
        }
        self.ensure(total_len).await?;
        let frame = self.buf[self.cursor..self.cursor + total_len].to_vec();
        self.cursor += total_len;
        self.compact();
        Ok(frame)
    }

    /// Read until `delimiter` appears in the buffered stream (frame
    /// includes the delimiter) or `byte_budget` bytes have been
    /// accumulated without finding it, whichever comes first.
    pub async fn next_delimited(
        &mut self,
        delimiter: &[u8],
        byte_budget: usize,
    ) -> GatewayResult<Frame> {
        loop {
            if let Some(rel) = find_subslice(&self.buf[self.cursor..], delimiter) {
                let end = self.cursor + rel + delimiter.len();
                let frame = self.buf[self.cursor..end].to_vec();
                self.cursor = end;
                self.compact();
                return Ok(frame);
            }
            if self.pending_len() >= byte_budget {
                return Err(GatewayError::protocol_error(format!(
                    "delimiter not found within {byte_budget}-byte budget"
                )));
            }
            self.read_more().await?;
        }
    }

    /// Read exactly `n` bytes as a frame (used by fixed-size handshakes,
    /// e.g. an SSH banner terminator scan already consumed, or a raw
    /// fixed-width record).
    pub async fn next_fixed(&mut self, n: usize) -> GatewayResult<Frame> {
        self.ensure(n).await?;
        let frame = self.buf[self.cursor..self.cursor + n].to_vec();
        self.cursor += n;
        self.compact();
        Ok(frame)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn length_prefixed_splits_concatenated_frames_regardless_of_chunking() {
        // Two frames: [len=5]"hello", [len=3]"abc" — fed through in one
        // continuous byte stream to exercise the frame boundary.
        let mut wire = Vec::new();
        wire.extend_from_slice(&5u32.to_be_bytes());
        wire.extend_from_slice(b"hello");
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(b"abc");

        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let parse = |hdr: &[u8]| -> GatewayResult<usize> {
            Ok(4 + u32::from_be_bytes(hdr.try_into().unwrap()) as usize)
        };

        let f1 = reader.next_length_prefixed(4, parse).await.unwrap();
        assert_eq!(&f1[4..], b"hello");
        let f2 = reader.next_length_prefixed(4, parse).await.unwrap();
        assert_eq!(&f2[4..], b"abc");
    }

    #[tokio::test]
    async fn delimited_frame_stops_exactly_at_delimiter() {
        let wire = b"220-Welcome\r\n220 Ready\r\nTRAILING".to_vec();
        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let frame = reader.next_delimited(b"\r\n", 1024).await.unwrap();
        assert_eq!(frame, b"220-Welcome\r\n");
        // Trailing bytes remain for the next call.
        let frame2 = reader.next_delimited(b"\r\n", 1024).await.unwrap();
        assert_eq!(frame2, b"220 Ready\r\n");
    }

    #[tokio::test]
    async fn delimited_frame_over_budget_is_protocol_error() {
        let wire = vec![b'x'; 100];
        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let err = reader.next_delimited(b"\r\n", 16).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn hard_cap_rejects_oversized_declared_length() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&1_000_000u32.to_be_bytes());
        let mut reader = FramedReader::new(Cursor::new(wire), 1024);
        let parse = |hdr: &[u8]| -> GatewayResult<usize> {
            Ok(4 + u32::from_be_bytes(hdr.try_into().unwrap()) as usize)
        };
        let err = reader.next_length_prefixed(4, parse).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_network_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&100u32.to_be_bytes());
        wire.extend_from_slice(b"short");
        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let parse = |hdr: &[u8]| -> GatewayResult<usize> {
            Ok(4 + u32::from_be_bytes(hdr.try_into().unwrap()) as usize)
        };
        let err = reader.next_length_prefixed(4, parse).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Network);
    }

    #[tokio::test]
    async fn next_fixed_reads_exact_byte_count() {
        let wire = b"abcdefgh".to_vec();
        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let f = reader.next_fixed(3).await.unwrap();
        assert_eq!(f, b"abc");
        let rest = reader.next_fixed(5).await.unwrap();
        assert_eq!(rest, b"defgh");
    }

    #[tokio::test]
    async fn oversized_single_read_chunk_leaves_remainder_buffered() {
        // Simulates the runtime delivering more than one frame's worth of
        // bytes in a single `read` call.
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(b"abc");
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(b"xyz");
        let mut reader = FramedReader::new(Cursor::new(wire), 1 << 20);
        let parse = |hdr: &[u8]| -> GatewayResult<usize> {
            Ok(4 + u32::from_be_bytes(hdr.try_into().unwrap()) as usize)
        };
        let f1 = reader.next_length_prefixed(4, parse).await.unwrap();
        assert_eq!(&f1[4..], b"abc");
        assert_eq!(reader.pending_len(), 7);
        let f2 = reader.next_length_prefixed(4, parse).await.unwrap();
        assert_eq!(&f2[4..], b"xyz");
        assert_eq!(reader.pending_len(), 0);
    }
}
