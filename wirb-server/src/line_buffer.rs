//! Reassembles newline-terminated lines from arbitrary byte chunks.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no such line: {0}")]
pub struct NoSuchLine(pub usize);

/// Outcome of one [`LineBuffer::feed`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fed {
    /// The line completed by this chunk, newline included.
    pub line: Option<Vec<u8>>,
    /// Whether unterminated bytes are still held back.
    pub pending: bool,
}

/// Every line seen so far, numbered from 1, plus the bytes of the line
/// still being received.
///
/// Lines are kept as received. Recorded lines followed by the pending
/// remainder always reproduce the input byte for byte.
#[derive(Debug, Default)]
pub struct LineBuffer {
    lines: Vec<Vec<u8>>,
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer::default()
    }

    /// Appends `chunk` and extracts at most one complete line.
    pub fn feed(&mut self, chunk: &[u8]) -> Fed {
        self.pending.extend_from_slice(chunk);
        let line = self.take_line();
        Fed {
            line,
            pending: !self.pending.is_empty(),
        }
    }

    /// Extracts the next line already held in the buffer, if any.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|b| *b == b'\n')? + 1;
        let rest = self.pending.split_off(end);
        let line = std::mem::replace(&mut self.pending, rest);

        self.lines.push(line.clone());
        Some(line)
    }

    /// Line `n`, counting from 1.
    pub fn line(&self, n: usize) -> Result<&[u8], NoSuchLine> {
        n.checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(Vec::as_slice)
            .ok_or(NoSuchLine(n))
    }

    /// Number of recorded lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.lines.iter().map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn partial_chunks_make_one_line() {
        let mut buf = LineBuffer::new();
        assert_eq!(
            buf.feed(b"pu"),
            Fed {
                line: None,
                pending: true
            }
        );
        assert_eq!(
            buf.feed(b"ts 1\n"),
            Fed {
                line: Some(b"puts 1\n".to_vec()),
                pending: false
            }
        );
        assert_eq!(buf.line(1), Ok(&b"puts 1\n"[..]));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn one_line_per_feed() {
        let mut buf = LineBuffer::new();
        let fed = buf.feed(b"a\nb\nc");
        assert_eq!(fed.line.as_deref(), Some(&b"a\n"[..]));
        assert!(fed.pending);

        assert_eq!(buf.take_line().as_deref(), Some(&b"b\n"[..]));
        assert_eq!(buf.take_line(), None);
        assert_eq!(buf.pending(), b"c");
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn remainder_survives_a_second_feed() {
        let mut buf = LineBuffer::new();
        buf.feed(b"x\nfirst ");
        buf.feed(b"half\ny\n");
        assert_eq!(buf.take_line().as_deref(), Some(&b"y\n"[..]));
        assert_eq!(
            buf.lines().collect::<Vec<_>>(),
            [&b"x\n"[..], &b"first half\n"[..], &b"y\n"[..]]
        );
    }

    #[test]
    fn missing_lines_are_reported() {
        let mut buf = LineBuffer::new();
        buf.feed(b"only\n");
        assert_eq!(buf.line(0), Err(NoSuchLine(0)));
        assert_eq!(buf.line(2), Err(NoSuchLine(2)));
        assert_eq!(NoSuchLine(2).to_string(), "no such line: 2");
    }

    #[test]
    fn invalid_utf8_is_kept_verbatim() {
        let mut buf = LineBuffer::new();
        let fed = buf.feed(b"\xff\n");
        assert_eq!(fed.line.as_deref(), Some(&[0xff, b'\n'][..]));
        assert_eq!(buf.line(1), Ok(&[0xff, b'\n'][..]));
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let mut buf = LineBuffer::new();
        let text = "héllo\n".as_bytes();
        buf.feed(&text[..2]);
        let fed = buf.feed(&text[2..]);
        assert_eq!(fed.line.as_deref(), Some(text));
    }

    proptest! {
        #[test]
        fn lines_and_remainder_reproduce_input(
            bytes in proptest::collection::vec(prop_oneof![Just(b'\n'), any::<u8>()], 0..64),
            cuts in proptest::collection::vec(0usize..80, 0..8),
            drain in any::<bool>(),
        ) {
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(bytes.len())).collect();
            cuts.push(0);
            cuts.push(bytes.len());
            cuts.sort_unstable();

            let mut buf = LineBuffer::new();
            for pair in cuts.windows(2) {
                buf.feed(&bytes[pair[0]..pair[1]]);
                if drain {
                    while buf.take_line().is_some() {}
                }
            }

            let mut seen: Vec<u8> = buf.lines().flatten().copied().collect();
            seen.extend_from_slice(buf.pending());
            prop_assert_eq!(&seen, &bytes);

            for (i, line) in buf.lines().enumerate() {
                prop_assert_eq!(buf.line(i + 1), Ok(line));
                prop_assert_eq!(line.last(), Some(&b'\n'));
            }
        }
    }
}
