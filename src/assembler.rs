//! Message assembly
//!
//! Drains everything a non-blocking stream currently has to offer into one
//! decoded string. A message is whatever a single drain collects; there is
//! no framing beyond read boundaries.

use std::io::{self, ErrorKind, Read};

/// Result of draining one readable stream
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Decoded text (empty means nothing to broadcast)
    pub text: String,
    /// Raw bytes read during this drain
    pub bytes: usize,
    /// End of stream was observed; the caller must close the connection
    pub closed: bool,
}

/// Incremental UTF-8 decoder
///
/// Holds back an incomplete trailing sequence so a character split across
/// two reads is decoded intact. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk` and append the result to `out`
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let joined: Vec<u8>;
        let mut rest: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            self.carry.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.carry);
            &joined
        };

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    return;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more bytes
                            self.carry.extend_from_slice(tail);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush any held-back bytes (lossily) once the stream has ended
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.carry));
            self.carry.clear();
        }
    }

    /// Number of bytes waiting for the rest of their character
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Read from `reader` until it would block or reports end of stream
///
/// `scratch` is the fixed-size read buffer. Text read before an end of
/// stream is still returned, with `closed` set. Any other read error is
/// returned as-is and the text gathered so far is dropped along with the
/// connection.
pub fn drain<R: Read>(
    reader: &mut R,
    scratch: &mut [u8],
    decoder: &mut Utf8Decoder,
) -> io::Result<Drained> {
    debug_assert!(!scratch.is_empty(), "scratch buffer must not be empty");

    let mut drained = Drained::default();
    loop {
        match reader.read(scratch) {
            Ok(0) => {
                decoder.finish(&mut drained.text);
                drained.closed = true;
                break;
            }
            Ok(n) => {
                drained.bytes += n;
                decoder.decode(&scratch[..n], &mut drained.text);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(drained)
}
