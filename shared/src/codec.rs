//! Newline codec for the device text stream
//!
//! Every application message is one line of text:
//! ```text
//! [ N bytes: UTF-8 payload ][ optional '\r' ][ '\n' ]
//! ```
//!
//! Links deliver the stream in arbitrary fragments (one BLE notification, one
//! serial poll), so raw bytes are accumulated until a delimiter completes a
//! frame. Splitting happens on raw bytes before decoding, which keeps
//! multi-byte characters intact when they straddle two chunks.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Stateful byte-to-message decoder
///
/// The receive buffer survives across `feed` calls for the lifetime of a
/// session and is cleared with [`FrameAssembler::reset`] when a new link is
/// established.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    /// Bytes not yet resolved into a complete frame
    buffer: BytesMut,
}

impl FrameAssembler {
    /// Create a new frame assembler
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Append a raw chunk and return the frames it completes
    ///
    /// The returned iterator is lazy: frames it does not yield stay buffered
    /// and are returned by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames {
            buffer: &mut self.buffer,
        }
    }

    /// Frames already complete in the buffer, without adding data
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            buffer: &mut self.buffer,
        }
    }

    /// Number of buffered bytes (the unterminated tail)
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Iterator over the complete frames currently held by a [`FrameAssembler`]
#[derive(Debug)]
pub struct Frames<'a> {
    buffer: &'a mut BytesMut,
}

impl Iterator for Frames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let pos = self.buffer.iter().position(|&b| b == DELIMITER)?;
            let line = self.buffer.split_to(pos + 1);
            let text = decode_line(&line[..pos]);

            // Blank lines carry nothing for the consumer
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
}

/// Decode one raw line for display
///
/// Surrounding whitespace (including the firmware's `\r`) is trimmed. Lines
/// that are not valid UTF-8 are rendered as lowercase hex instead of being
/// dropped.
pub fn decode_line(raw: &[u8]) -> String {
    let raw = trim_ascii_whitespace(raw);
    match std::str::from_utf8(raw) {
        Ok(text) => text.trim().to_owned(),
        Err(_) => to_hex(raw),
    }
}

/// Encode an outbound message, appending the delimiter if missing
pub fn encode_line(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    if !text.ends_with('\n') {
        buf.put_u8(DELIMITER);
    }
    buf.freeze()
}

fn trim_ascii_whitespace(mut raw: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = raw {
        if !first.is_ascii_whitespace() {
            break;
        }
        raw = rest;
    }
    while let [rest @ .., last] = raw {
        if !last.is_ascii_whitespace() {
            break;
        }
        raw = rest;
    }
    raw
}

fn to_hex(raw: &[u8]) -> String {
    raw.iter().map(|b| format!("{:02x}", b)).collect()
}
