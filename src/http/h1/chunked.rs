//! Chunked transfer encoding
//!
//! Encoder for writing chunked bodies and a resumable decoder that can
//! pause mid-chunk and continue when more input arrives. Trailer headers
//! after the terminating zero chunk are collected for the caller.

use super::super::{Error, Headers, Result, CRLF};
use std::io::Write;

/// Chunked encoder over any writer.
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write one chunk. Empty input writes nothing; a zero-size chunk is
    /// reserved for [`finish`](Self::finish).
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;
        Ok(())
    }

    /// Write the terminating zero chunk.
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

/// Resumable chunked decoder.
///
/// Feed input through [`decode`](Self::decode); decoded payload is appended
/// to the output, consumed bytes are drained from the front of the input.
/// When the input ends inside a chunk the decoder pauses and resumes on the
/// next call.
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    trailers: Headers,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            trailers: Headers::new(),
        }
    }

    /// Whether the terminating chunk and trailers have been consumed.
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Trailer headers seen after the zero chunk.
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// Take the collected trailers.
    pub fn take_trailers(&mut self) -> Headers {
        std::mem::take(&mut self.trailers)
    }

    /// Decode as much as possible from `input` into `output`.
    ///
    /// Returns `true` when the body is complete. Consumed bytes are removed
    /// from `input`; anything left needs more data to make progress.
    pub fn decode(&mut self, input: &mut Vec<u8>, output: &mut Vec<u8>) -> Result<bool> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(line_end) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&input[pos..pos + line_end]);
                    // Chunk extensions after ';' are ignored.
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    self.chunk_size = usize::from_str_radix(size_str, 16).map_err(|_| {
                        Error::InvalidResponseFormat(format!("bad chunk size: {}", size_str))
                    })?;
                    self.chunk_read = 0;
                    pos += line_end + 2;
                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let available = input.len() - pos;
                    if available == 0 {
                        break;
                    }
                    let want = self.chunk_size - self.chunk_read;
                    let take = want.min(available);
                    output.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.chunk_read += take;
                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    } else {
                        break;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::InvalidResponseFormat(
                            "missing CRLF after chunk".to_string(),
                        ));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(line_end) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    if line_end == 0 {
                        // Empty line terminates the trailer section.
                        pos += 2;
                        self.state = DecoderState::Complete;
                        continue;
                    }
                    let line = String::from_utf8_lossy(&input[pos..pos + line_end]).to_string();
                    pos += line_end + 2;
                    let (name, value) = Headers::parse_header_line(&line)?;
                    self.trailers.insert(name, value);
                }

                DecoderState::Complete => break,
            }
        }

        input.drain(..pos);
        Ok(self.is_complete())
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
