//! Newline-delimited frame codec
//!
//! Splits the serial byte stream into text lines. Unlike
//! `tokio_util::codec::LinesCodec` this never fails on the data itself:
//! invalid UTF-8 is decoded lossily and overlong lines are discarded up to the
//! next newline, because a noisy serial link must not force a reconnect.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Codec yielding one `String` per `\n`-terminated line
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_len: usize,
    /// Set while skipping the remainder of an overlong line
    discarding: bool,
    /// Lines dropped for exceeding `max_len`
    overlong: u64,
}

impl FrameCodec {
    /// Create a codec that drops lines longer than `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            discarding: false,
            overlong: 0,
        }
    }

    /// Number of lines dropped for exceeding the length limit
    pub fn overlong_count(&self) -> u64 {
        self.overlong
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_LINE_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            match take_line(buf) {
                Some(line) => {
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if line.len() > self.max_len {
                        self.overlong += 1;
                        continue;
                    }
                    return Ok(Some(decode_text(&line)));
                }
                None => {
                    if buf.len() > self.max_len {
                        // No newline in sight; drop what we have and skip to the next one
                        buf.clear();
                        if !self.discarding {
                            self.overlong += 1;
                        }
                        self.discarding = true;
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(decode_text(&rest)))
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches(['\r', '\n']).to_string()
}

/// Split off the next complete line, without its `\n`
fn take_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let pos = buf.iter().position(|b| *b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    Some(line)
}
