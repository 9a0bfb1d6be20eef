use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use wirb_server::{CurrentSession, Server, SessionHooks, SessionInfo, SessionOptions};

#[derive(Default)]
struct Counting {
    ended: AtomicUsize,
    exited: AtomicUsize,
}

impl SessionHooks for Counting {
    fn session_ended(&self, _info: &SessionInfo) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn at_exit(&self) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }
}

struct Running {
    addr: SocketAddr,
    hooks: Arc<Counting>,
    current: CurrentSession,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

async fn start() -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hooks = Arc::new(Counting::default());
    let server = Server::new(SessionOptions::default(), hooks.clone());
    let current = server.current_session();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(listener, async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        hooks,
        current,
        stop,
        handle,
    }
}

struct Client {
    stream: TcpStream,
    seen: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Client {
        Client {
            stream: TcpStream::connect(addr).await.unwrap(),
            seen: Vec::new(),
        }
    }

    async fn send(&mut self, text: &str) {
        self.stream.write_all(text.as_bytes()).await.unwrap();
    }

    async fn until(&mut self, needle: &str) -> String {
        let mut buf = [0; 512];
        loop {
            let text = String::from_utf8_lossy(&self.seen).into_owned();
            if let Some(at) = text.find(needle) {
                let end = at + needle.len();
                self.seen.drain(..end);
                return text[..end].to_string();
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "closed before {:?}; got {:?}", needle, text);
            self.seen.extend_from_slice(&buf[..n]);
        }
    }

    async fn rest(mut self) -> String {
        self.stream.read_to_end(&mut self.seen).await.unwrap();
        String::from_utf8(self.seen).unwrap()
    }
}

async fn eventually(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_a_repl_per_connection() {
    let server = start().await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.until("> ").await, "wirb(main):001:0> ");
    client.send("puts 1+1\n").await;
    assert_eq!(
        client.until("wirb(main):002:0> ").await,
        "2\n=> nil\nwirb(main):002:0> "
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_closes_the_connection() {
    let server = start().await;
    let mut client = Client::connect(server.addr).await;

    client.until("wirb(main):001:0> ").await;
    client.send("exit\n").await;
    assert_eq!(client.rest().await, "");
    eventually(&server.hooks.ended, 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_do_not_share_state_or_output() {
    let server = start().await;
    let mut a = Client::connect(server.addr).await;
    a.until("wirb(main):001:0> ").await;
    let mut b = Client::connect(server.addr).await;
    b.until("wirb(main):001:0> ").await;
    assert_eq!(server.current.get().map(|info| info.id), Some(2));

    a.send("x = 1; puts \"from a\"\n").await;
    assert_eq!(
        a.until("wirb(main):002:0> ").await,
        "from a\n=> nil\nwirb(main):002:0> "
    );

    b.send("x\n").await;
    let out = b.until("wirb(main):002:0> ").await;
    assert!(out.contains("undefined local variable or method 'x'"), "{}", out);
    assert!(!out.contains("from a"));

    a.send("x + 1\n").await;
    assert_eq!(
        a.until("wirb(main):003:0> ").await,
        "=> 2\nwirb(main):003:0> "
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_open_sessions_and_runs_at_exit_once() {
    let server = start().await;
    let mut client = Client::connect(server.addr).await;
    client.until("wirb(main):001:0> ").await;

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();

    assert_eq!(server.hooks.exited.load(Ordering::SeqCst), 1);
    assert_eq!(server.hooks.ended.load(Ordering::SeqCst), 1);
    assert_eq!(client.rest().await, "");
}
