//! Brute framing: JSON documents written back to back on the socket with no
//! length prefix or delimiter. A frame ends where its top-level object or
//! array closes.

use std::io;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are treated as a broken stream.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct JsonRpcCodec {
    /// How far into the buffer the scanner has already looked
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Decoder for JsonRpcCodec {
    type Item = serde_json::Value;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Drop whitespace between frames
        if self.depth == 0 {
            let leading = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
            src.advance(leading);
            self.scanned = 0;
        }

        let mut end = None;
        for (offset, &byte) in src[self.scanned..].iter().enumerate() {
            let index = self.scanned + offset;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'{' | b'[' => self.depth += 1,
                _ if self.depth == 0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected byte 0x{:02x} between frames", byte),
                    ));
                }
                b'"' => self.in_string = true,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        end = Some(index + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(len) => {
                let frame = src.split_to(len);
                self.reset();
                serde_json::from_slice(&frame)
                    .map(Some)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            None => {
                self.scanned = src.len();
                if src.len() > MAX_FRAME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame exceeds {} bytes", MAX_FRAME_LEN),
                    ));
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<serde_json::Value> for JsonRpcCodec {
    type Error = io::Error;

    fn encode(&mut self, item: serde_json::Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
