use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::SessionError;
use crate::hooks::{CurrentSession, SessionHooks, SessionInfo};
use crate::session::{Session, SessionOptions};

/// Accepts connections and gives each one its own [`Session`].
pub struct Server {
    options: SessionOptions,
    hooks: Arc<dyn SessionHooks>,
    current: CurrentSession,
    next_id: u64,
}

impl Server {
    pub fn new(options: SessionOptions, hooks: Arc<dyn SessionHooks>) -> Server {
        Server {
            options,
            hooks,
            current: CurrentSession::default(),
            next_id: 1,
        }
    }

    /// Handle on the most recently started session.
    pub fn current_session(&self) -> CurrentSession {
        self.current.clone()
    }

    /// Serves `listener` until `shutdown` resolves. Open sessions are then
    /// cancelled and `at_exit` runs once.
    pub async fn run(mut self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "server listening");

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let id = self.next_id;
                        self.next_id += 1;

                        let (read_half, write_half) = socket.into_split();
                        let info = SessionInfo { id, peer: Some(peer) };
                        let session = Session::new(read_half, write_half, info, &self.options);
                        let run = session.run(self.hooks.clone(), Some(self.current.clone()));
                        sessions.spawn(run.instrument(info_span!("session", id, %peer)));
                    }
                    Err(err) => {
                        // Typically out of file descriptors; give it a moment.
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_finished(joined);
                }
            }
        }

        info!(open = sessions.len(), "shutting down");
        sessions.shutdown().await;
        self.hooks.at_exit();
        Ok(())
    }
}

fn log_finished(joined: Result<Result<(), SessionError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => debug!("session finished"),
        Ok(Err(err)) => warn!(error = %err, "session failed"),
        Err(err) if err.is_cancelled() => debug!("session cancelled"),
        Err(err) => warn!(error = %err, "session task failed"),
    }
}
