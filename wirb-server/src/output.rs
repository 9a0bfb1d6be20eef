use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use wirb::OutputMethod;

/// Most bytes an [`Outbox`] holds between flushes. Anything past this is dropped.
pub const MAX_PENDING: usize = 64 << 20;

#[derive(Default)]
struct Pending {
    bytes: Vec<u8>,
    dropped: usize,
}

/// Synchronous side of the [`OutputAdapter`]: evaluation code queues text
/// here and the session drains it at its next write.
#[derive(Clone, Default)]
pub struct Outbox(Arc<Mutex<Pending>>);

impl Outbox {
    pub fn push(&self, bytes: &[u8]) {
        let mut pending = self.0.lock();
        let room = MAX_PENDING.saturating_sub(pending.bytes.len());
        let kept = bytes.len().min(room);
        pending.bytes.extend_from_slice(&bytes[..kept]);
        pending.dropped += bytes.len() - kept;
    }

    pub fn take(&self) -> Vec<u8> {
        let mut pending = self.0.lock();
        if pending.dropped > 0 {
            warn!(dropped = pending.dropped, "output queue overflowed");
            pending.dropped = 0;
        }
        std::mem::take(&mut pending.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().bytes.is_empty()
    }
}

impl io::Write for Outbox {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputMethod for Outbox {
    fn print(&mut self, text: &str) {
        self.push(text.as_bytes());
    }
}

/// Errors meaning the peer is gone rather than that something broke.
fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Write half of a session's connection.
///
/// Write failures never reach the caller. Once a write has failed the
/// adapter drops further output; the next read notices the closed
/// connection and ends the session.
pub struct OutputAdapter<W> {
    writer: W,
    outbox: Outbox,
    broken: bool,
}

impl<W: AsyncWrite + Unpin> OutputAdapter<W> {
    pub fn new(writer: W) -> OutputAdapter<W> {
        OutputAdapter {
            writer,
            outbox: Outbox::default(),
            broken: false,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Queues `text` without touching the connection.
    pub fn print(&mut self, text: &str) {
        self.outbox.push(text.as_bytes());
    }

    pub async fn write(&mut self, text: &str) {
        self.print(text);
        self.flush().await;
    }

    /// Sends everything queued so far.
    pub async fn flush(&mut self) {
        let bytes = self.outbox.take();
        if bytes.is_empty() || self.broken {
            return;
        }

        if let Err(err) = self.send(&bytes).await {
            self.broken = true;
            if is_disconnect(&err) {
                debug!(error = %err, dropped = bytes.len(), "peer went away during write");
            } else {
                warn!(error = %err, dropped = bytes.len(), "write failed");
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    pub async fn close(&mut self) {
        if let Err(err) = self.writer.shutdown().await {
            debug!(error = %err, "shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn print_queues_until_flush() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut output = OutputAdapter::new(server);

        output.print("queued ");
        let mut outbox = output.outbox();
        write!(outbox, "{}", 42).unwrap();
        assert!(!outbox.is_empty());

        output.write("now\n").await;
        assert!(outbox.is_empty());

        let mut buf = [0; 32];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"queued 42now\n");
    }

    #[tokio::test]
    async fn writes_to_a_closed_peer_are_swallowed() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut output = OutputAdapter::new(server);
        output.write("nobody is listening\n").await;
        assert!(output.is_broken());

        output.write("still fine\n").await;
        assert!(output.outbox().is_empty());
        output.close().await;
    }

    #[test]
    fn outbox_drops_past_its_limit() {
        let outbox = Outbox::default();
        outbox.push(&vec![b'x'; MAX_PENDING - 1]);
        outbox.push(b"yz");
        outbox.push(b"more");

        let bytes = outbox.take();
        assert_eq!(bytes.len(), MAX_PENDING);
        assert_eq!(bytes.last(), Some(&b'y'));

        outbox.push(b"fresh");
        assert_eq!(outbox.take(), b"fresh");
    }

    #[test]
    fn disconnect_errors() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
