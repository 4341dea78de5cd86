//! Accumulates non-blocking reads into complete messages.

use std::collections::VecDeque;
use std::io::{self, Read};

use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::codec::MessageCodec;
use super::protocol::Message;

const READ_CHUNK: usize = 4096;

/// State of the inbound stream after a read burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Drained everything available; the writer is still there.
    Open,
    /// End of stream: the method closed its stdout.
    Closed,
}

/// Buffers partial input across reads and yields messages once terminated.
#[derive(Debug, Default)]
pub struct Framer {
    codec: MessageCodec,
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until the source would block, appending every complete message to
    /// `out` in arrival order.
    ///
    /// Errors other than `WouldBlock`/`Interrupted` are returned as-is; callers
    /// treat them like [`ReadStatus::Closed`].
    pub fn read_from<R: Read>(
        &mut self,
        src: &mut R,
        out: &mut VecDeque<Message>,
    ) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match src.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => self.extend(&chunk[..n], out)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
                Err(e) => return Err(e),
            }
        }
    }

    /// Feed raw bytes, appending every message they complete to `out`.
    pub fn extend(&mut self, bytes: &[u8], out: &mut VecDeque<Message>) -> io::Result<()> {
        self.buf.extend_from_slice(bytes);
        while let Some(msg) = self.codec.decode(&mut self.buf)? {
            out.push_back(msg);
        }
        Ok(())
    }

    /// Bytes received but not yet part of a complete message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
