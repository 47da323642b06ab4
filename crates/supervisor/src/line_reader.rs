use tokio::io::{AsyncRead, AsyncReadExt};

const INITIAL_CHUNK_BYTES: usize = 64 * 1024;

/// Outcome of reading one logical line from a bounded, line-oriented stream.
#[derive(Debug)]
pub enum BoundedLine {
    Line { bytes: Vec<u8> },
    LineTooLong { observed_bytes: usize, max_line_bytes: usize },
    Eof,
    Io(std::io::Error),
}

/// Line-oriented reader over an async child-output pipe with a bounded
/// maximum line length (§4.3: 64 KiB initial read chunk, 10 MiB max line,
/// since large JSON stream events are common on these pipes).
///
/// Unlike `tokio::io::AsyncBufReadExt::lines`, an over-long line is
/// discarded rather than returned, and discarding is signalled distinctly so
/// callers can emit a non-fatal `error` event instead of silently truncating.
pub struct AsyncBoundedLineReader<R> {
    reader: R,
    max_line_bytes: usize,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    discard_mode: bool,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncBoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            buffer: vec![0u8; INITIAL_CHUNK_BYTES],
            buffer_pos: 0,
            buffer_len: 0,
            current_line: Vec::new(),
            observed_bytes: 0,
            discard_mode: false,
            done: false,
        }
    }

    fn observe_bytes(&mut self, additional: usize) {
        self.observed_bytes = self.observed_bytes.saturating_add(additional);
        if self.observed_bytes > self.max_line_bytes && !self.discard_mode {
            self.discard_mode = true;
            self.current_line.clear();
        }
    }

    fn reset_line_state(&mut self) {
        self.current_line.clear();
        self.observed_bytes = 0;
        self.discard_mode = false;
    }

    async fn fill_buffer(&mut self) -> std::io::Result<usize> {
        self.buffer_pos = 0;
        let n = self.reader.read(&mut self.buffer).await?;
        self.buffer_len = n;
        Ok(n)
    }

    pub async fn next_line(&mut self) -> BoundedLine {
        if self.done {
            return BoundedLine::Eof;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                match self.fill_buffer().await {
                    Ok(0) => {
                        self.done = true;
                        if self.discard_mode {
                            let observed_bytes = self.observed_bytes;
                            let max_line_bytes = self.max_line_bytes;
                            self.reset_line_state();
                            return BoundedLine::LineTooLong {
                                observed_bytes,
                                max_line_bytes,
                            };
                        }
                        if !self.current_line.is_empty() {
                            let bytes = std::mem::take(&mut self.current_line);
                            return BoundedLine::Line { bytes };
                        }
                        return BoundedLine::Eof;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.done = true;
                        return BoundedLine::Io(e);
                    }
                }
            }

            let slice = &self.buffer[self.buffer_pos..self.buffer_len];
            let newline_idx = slice.iter().position(|b| *b == b'\n');

            let Some(newline_idx) = newline_idx else {
                let slice_len = slice.len();
                self.observe_bytes(slice_len);
                if !self.discard_mode {
                    let slice = &self.buffer[self.buffer_pos..self.buffer_len];
                    self.current_line.extend_from_slice(slice);
                }
                self.buffer_pos = self.buffer_len;
                continue;
            };

            self.observe_bytes(newline_idx);
            if !self.discard_mode {
                let segment = &self.buffer[self.buffer_pos..self.buffer_pos + newline_idx];
                self.current_line.extend_from_slice(segment);
            }
            self.buffer_pos += newline_idx + 1;

            if self.discard_mode {
                let observed_bytes = self.observed_bytes;
                let max_line_bytes = self.max_line_bytes;
                self.reset_line_state();
                return BoundedLine::LineTooLong {
                    observed_bytes,
                    max_line_bytes,
                };
            }
            let bytes = std::mem::take(&mut self.current_line);
            self.reset_line_state();
            return BoundedLine::Line { bytes };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn yields_lines_in_order() {
        let mut reader = AsyncBoundedLineReader::new(Cursor::new(b"one\ntwo\nthree\n".to_vec()), 1024);
        let mut lines = Vec::new();
        loop {
            match reader.next_line().await {
                BoundedLine::Line { bytes } => lines.push(String::from_utf8(bytes).unwrap()),
                BoundedLine::Eof => break,
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn yields_trailing_unterminated_line_at_eof() {
        let mut reader = AsyncBoundedLineReader::new(Cursor::new(b"partial".to_vec()), 1024);
        match reader.next_line().await {
            BoundedLine::Line { bytes } => assert_eq!(bytes, b"partial"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(reader.next_line().await, BoundedLine::Eof));
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_and_iteration_continues() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ok\n");
        data.extend_from_slice(&vec![b'a'; 50]);
        data.extend_from_slice(b"\nnext\n");

        let mut reader = AsyncBoundedLineReader::new(Cursor::new(data), 16);
        let first = reader.next_line().await;
        assert!(matches!(first, BoundedLine::Line { .. }));
        let second = reader.next_line().await;
        assert!(matches!(second, BoundedLine::LineTooLong { .. }));
        let third = reader.next_line().await;
        match third {
            BoundedLine::Line { bytes } => assert_eq!(bytes, b"next"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
