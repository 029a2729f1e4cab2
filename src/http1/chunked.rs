//! Chunked transfer-encoding decoder for control responses.

use super::ParseError;

/// Decoding state across `feed` calls.
enum State {
    Size,
    Data { remaining: usize },
    DataCrlf,
    Trailer,
    Done,
}

/// Incremental chunked-body decoder. Feed raw bytes, collect decoded bytes,
/// stop once [`ChunkedDecoder::is_done`] reports the terminal chunk.
pub struct ChunkedDecoder {
    state: State,
    line: Vec<u8>,
    out: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: State::Size,
            line: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.out
    }

    /// Consume a chunk of wire bytes.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<(), ParseError> {
        while !data.is_empty() {
            match self.state {
                State::Size => {
                    data = self.take_line(data);
                    if let Some(line) = self.pop_line() {
                        let size = parse_chunk_size(&line)?;
                        self.state = if size == 0 {
                            State::Trailer
                        } else {
                            State::Data { remaining: size }
                        };
                    }
                }
                State::Data { remaining } => {
                    let take = remaining.min(data.len());
                    self.out.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if take == remaining {
                        self.state = State::DataCrlf;
                    } else {
                        self.state = State::Data {
                            remaining: remaining - take,
                        };
                    }
                }
                State::DataCrlf => {
                    data = self.take_line(data);
                    if self.pop_line().is_some() {
                        self.state = State::Size;
                    }
                }
                State::Trailer => {
                    // Trailer lines end at the first empty one.
                    data = self.take_line(data);
                    if let Some(line) = self.pop_line() {
                        if line.is_empty() {
                            self.state = State::Done;
                        }
                    }
                }
                State::Done => return Ok(()),
            }
        }
        Ok(())
    }

    fn take_line<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        for (i, &b) in data.iter().enumerate() {
            self.line.push(b);
            if b == b'\n' {
                return &data[i + 1..];
            }
        }
        &[]
    }

    fn pop_line(&mut self) -> Option<Vec<u8>> {
        if self.line.last() == Some(&b'\n') {
            let mut line = std::mem::take(&mut self.line);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Some(line)
        } else {
            None
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::ChunkSize(String::from_utf8_lossy(line).into_owned()))?;
    // Chunk extensions after ';' are ignored.
    let size_part = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_part, 16).map_err(|_| ParseError::ChunkSize(text.to_string()))
}
