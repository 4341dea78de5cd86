//! Blank-line framing codec for method communication.
//!
//! Decodes the method's stdout into [`Message`]s and encodes [`Request`]s for
//! its stdin. Works over any byte buffer; the worker drives the actual reads
//! and writes itself because both pipe ends are non-blocking.

use std::io;

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{Message, Request, tag};
use crate::config::quote;

const TERMINATOR: &[u8] = b"\n\n";

/// Codec that splits messages on an empty line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Extra newlines between messages are padding, not empty messages.
        let padding = src.iter().take_while(|&&b| b == b'\n').count();
        src.advance(padding);

        let Some(end) = src.windows(TERMINATOR.len()).position(|w| w == TERMINATOR) else {
            return Ok(None);
        };

        let frame = src.split_to(end);
        src.advance(TERMINATOR.len());

        // Methods echo server-provided text; a stray invalid byte must not
        // stall the stream.
        let raw = String::from_utf8_lossy(&frame).into_owned();
        tracing::trace!(frame_bytes = frame.len(), "Decoded frame");
        Ok(Some(Message::new(raw)))
    }
}

impl Encoder<Request> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = match &item {
            Request::Acquire {
                uri,
                filename,
                headers,
            } => format!(
                "600 URI Acquire\n{}: {uri}\n{}: {filename}{headers}\n\n",
                tag::URI,
                tag::FILENAME
            ),
            Request::Configuration { items } => {
                let mut text = String::with_capacity(2000);
                text.push_str("601 Configuration\n");
                for (key, value) in items {
                    text.push_str(tag::CONFIG_ITEM);
                    text.push_str(": ");
                    text.push_str(key);
                    text.push('=');
                    text.push_str(&quote::quote(value, "\n"));
                    text.push('\n');
                }
                text.push('\n');
                text
            }
            Request::MediaChanged { failed: true } => {
                format!("603 Media Changed\n{}: true\n\n", tag::FAILED)
            }
            Request::MediaChanged { failed: false } => "603 Media Changed\n\n".to_string(),
        };

        dst.reserve(text.len());
        dst.put_slice(text.as_bytes());
        Ok(())
    }
}
