use std::borrow::Cow;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use crate::line_buffer::{LineBuffer, NoSuchLine};
use crate::output::OutputAdapter;

/// Encoding of every line read from a connection.
pub const ENCODING: &str = "UTF-8";

/// Most bytes taken from the connection in one read.
pub const DEFAULT_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gets {
    /// A complete line, newline included.
    Line(String),
    /// Bytes arrived but did not finish a line.
    Partial,
    /// The peer closed the connection or the read failed.
    Eof,
}

/// Read half of a session's connection.
pub struct InputAdapter<R> {
    reader: R,
    buffer: LineBuffer,
    chunk: Box<[u8]>,
    closed: bool,
}

impl<R: AsyncRead + Unpin> InputAdapter<R> {
    pub fn new(reader: R) -> InputAdapter<R> {
        Self::with_chunk_size(reader, DEFAULT_CHUNK)
    }

    pub fn with_chunk_size(reader: R, size: usize) -> InputAdapter<R> {
        InputAdapter {
            reader,
            buffer: LineBuffer::new(),
            chunk: vec![0; size.max(1)].into_boxed_slice(),
            closed: false,
        }
    }

    /// Shows `prompt`, then returns the next line. Performs at most one read.
    pub async fn gets<W: AsyncWrite + Unpin>(
        &mut self,
        prompt: &str,
        output: &mut OutputAdapter<W>,
    ) -> Gets {
        output.write(prompt).await;

        if let Some(line) = self.buffer.take_line() {
            return Gets::Line(decode(line));
        }

        match self.reader.read(&mut self.chunk).await {
            Ok(0) => {
                debug!("peer closed the connection");
                self.closed = true;
                Gets::Eof
            }
            Ok(n) => {
                debug!(bytes = n, "read");
                match self.buffer.feed(&self.chunk[..n]).line {
                    Some(line) => Gets::Line(decode(line)),
                    None => Gets::Partial,
                }
            }
            Err(err) => {
                debug!(error = %err, "read failed");
                self.closed = true;
                Gets::Eof
            }
        }
    }

    /// Whether the connection has been seen closed.
    pub fn at_end(&self) -> bool {
        self.closed
    }

    /// Reads may still be attempted once [`at_end`](Self::at_end) is true.
    pub fn readable_after_eof(&self) -> bool {
        true
    }

    /// Recorded line `n`, decoded.
    pub fn line(&self, n: usize) -> Result<Cow<'_, str>, NoSuchLine> {
        self.buffer.line(n).map(String::from_utf8_lossy)
    }

    pub fn line_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn encoding(&self) -> &'static str {
        ENCODING
    }
}

// Invalid sequences reach the evaluator as U+FFFD; the buffer keeps the bytes.
fn decode(line: Vec<u8>) -> String {
    String::from_utf8(line).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn prompt_then_line() {
        let (mut client, server) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut input = InputAdapter::new(read_half);
        let mut output = OutputAdapter::new(write_half);

        client.write_all(b"1 + 1\n").await.unwrap();
        assert_eq!(input.gets("> ", &mut output).await, Gets::Line("1 + 1\n".into()));

        let mut prompt = [0; 2];
        client.read_exact(&mut prompt).await.unwrap();
        assert_eq!(&prompt, b"> ");
        assert_eq!(input.line(1).unwrap(), "1 + 1\n");
        assert_eq!(input.line_count(), 1);
    }

    #[tokio::test]
    async fn buffered_lines_need_no_read() {
        let (mut client, server) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut input = InputAdapter::new(read_half);
        let mut output = OutputAdapter::new(write_half);

        client.write_all(b"a\nb\n").await.unwrap();
        assert_eq!(input.gets("", &mut output).await, Gets::Line("a\n".into()));
        // Nothing else is sent; a read here would hang.
        assert_eq!(input.gets("", &mut output).await, Gets::Line("b\n".into()));
    }

    #[tokio::test]
    async fn small_chunks_give_partial_reads() {
        let (mut client, server) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut input = InputAdapter::with_chunk_size(read_half, 3);
        let mut output = OutputAdapter::new(write_half);

        client.write_all(b"abcd\n").await.unwrap();
        assert_eq!(input.gets("", &mut output).await, Gets::Partial);
        assert_eq!(input.gets("", &mut output).await, Gets::Line("abcd\n".into()));
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let (mut client, server) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut input = InputAdapter::new(read_half);
        let mut output = OutputAdapter::new(write_half);

        client.write_all(b"\xff1\n").await.unwrap();
        assert_eq!(input.gets("", &mut output).await, Gets::Line("\u{fffd}1\n".into()));
        assert_eq!(input.line(1).unwrap(), "\u{fffd}1\n");
    }

    #[tokio::test]
    async fn closed_peer_is_end_of_input() {
        let (client, server) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut input = InputAdapter::new(read_half);
        let mut output = OutputAdapter::new(write_half);
        drop(client);

        assert!(!input.at_end());
        assert_eq!(input.gets("> ", &mut output).await, Gets::Eof);
        assert!(input.at_end());
        assert!(input.readable_after_eof());
        assert_eq!(input.gets("> ", &mut output).await, Gets::Eof);
        assert_eq!(input.line(1), Err(NoSuchLine(1)));
        assert_eq!(input.encoding(), "UTF-8");
    }
}
