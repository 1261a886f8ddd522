//! Connection session (spec §4.B): read loop, write serialization, liveness
//! flag, orderly shutdown, and the listener stack a match installs itself
//! onto for the duration of a game.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::frame::{FrameSplitter, Handler};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A connected client. The write half is shared (wrapped in a mutex) so
/// both the read loop and a match task can send to it; the read half is
/// exclusively owned by the task spawned from [`Session::run`].
pub struct Session {
    pub id: u64,
    pub addr: SocketAddr,
    login: Mutex<Option<String>>,
    writer: Mutex<OwnedWriteHalf>,
    listeners: Mutex<Vec<Handler>>,
    active: AtomicBool,
    /// Held across the ENDGAME-then-cleanup transition so no inbound frame
    /// can be dispatched mid-teardown (spec §4.B, §5 "read-gate contract").
    /// `Arc`-wrapped so the guard can be taken as an owned value and handed
    /// off to the registry cleanup step that ultimately releases it.
    read_gate: Arc<Mutex<()>>,
}

impl Session {
    pub fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            login: Mutex::new(None),
            writer: Mutex::new(writer),
            listeners: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            read_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn login(&self) -> Option<String> {
        self.login.lock().await.clone()
    }

    pub async fn set_login(&self, login: String) {
        *self.login.lock().await = Some(login);
    }

    /// Pushes `handler` onto the top of the listener stack.
    pub async fn push_listener(&self, handler: Handler) {
        self.listeners.lock().await.push(handler);
    }

    /// Pops the top of the listener stack, if any.
    pub async fn pop_listener(&self) -> Option<Handler> {
        self.listeners.lock().await.pop()
    }

    /// Acquires the read-gate. While the returned guard lives, the read
    /// loop cannot dispatch any further inbound frame from this session.
    /// The guard is owned (not borrowed from `self`) so it can be carried
    /// across a channel to whatever task ultimately releases it (spec §4.D:
    /// "the read-gates are released later by the registry cleanup step").
    pub async fn acquire_read_gate(&self) -> OwnedMutexGuard<()> {
        self.read_gate.clone().lock_owned().await
    }

    /// Safe to call from any task. A stopped session silently drops the
    /// send; a write failure marks the session inactive.
    pub async fn send(&self, bytes: &[u8]) {
        if !self.is_active() {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(bytes).await {
            warn!(session = self.id, error = %e, "write failed, marking session inactive");
            self.active.store(false, Ordering::Release);
        }
    }

    pub async fn stop(&self) {
        self.active.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Walks the listener stack top-to-bottom for one payload (spec §4.A):
    /// push appends, so "top" is the last element, hence `.rev()`.
    async fn dispatch(self: &Arc<Self>, payload: String) {
        let stack: Vec<Handler> = self.listeners.lock().await.clone();
        for handler in stack.iter().rev() {
            handler(payload.clone(), self.clone()).await;
        }
    }

    /// Spawns the dedicated read task (spec §4.B). `root` is pushed as the
    /// bottom-of-stack router before the first read.
    pub fn run(self: Arc<Self>, mut reader: OwnedReadHalf, root: Handler) {
        tokio::spawn(async move {
            self.push_listener(root).await;
            let mut splitter = FrameSplitter::default();
            let mut buf = [0u8; 4096];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!(session = self.id, "peer closed connection");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(session = self.id, error = %e, "read error");
                        break;
                    }
                };
                let frames = splitter.push(&buf[..n]);
                if frames.is_empty() {
                    continue;
                }
                let _gate = self.acquire_read_gate().await;
                for frame in frames {
                    self.dispatch(frame).await;
                }
            }
            self.active.store(false, Ordering::Release);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (Arc<Session>, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, client) = tokio::join!(listener.accept(), connect);
        let (server_stream, server_addr) = accepted.unwrap();
        let (_reader, writer) = server_stream.into_split();
        (Session::new(server_addr, writer), client.unwrap())
    }

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
        Arc::new(move |payload: String, _session: Arc<Session>| -> crate::frame::BoxFuture {
            let log = log.clone();
            Box::pin(async move {
                log.lock().await.push(format!("{tag}:{payload}"));
            })
        })
    }

    #[tokio::test]
    async fn listeners_dispatch_top_to_bottom() {
        let (session, _client) = connected_pair().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        session.push_listener(recording_handler(log.clone(), "router")).await;
        session.push_listener(recording_handler(log.clone(), "turn")).await;

        session.dispatch("STEP {}".to_string()).await;

        let entries = log.lock().await;
        assert_eq!(*entries, vec!["turn:STEP {}".to_string(), "router:STEP {}".to_string()]);
    }

    #[tokio::test]
    async fn pop_listener_restores_the_one_below() {
        let (session, _client) = connected_pair().await;
        let log = Arc::new(Mutex::new(Vec::new()));
        session.push_listener(recording_handler(log.clone(), "router")).await;
        session.push_listener(recording_handler(log.clone(), "turn")).await;

        let popped = session.pop_listener().await;
        assert!(popped.is_some());
        session.dispatch("DISCONNECT".to_string()).await;

        let entries = log.lock().await;
        assert_eq!(*entries, vec!["router:DISCONNECT".to_string()]);
    }

    #[tokio::test]
    async fn stop_marks_inactive_and_drops_further_sends() {
        let (session, mut client) = connected_pair().await;
        session.send(b"hello\n").await;
        session.stop().await;
        assert!(!session.is_active());

        session.send(b"should not arrive\n").await;

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[tokio::test]
    async fn run_feeds_complete_frames_to_the_root_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, client) = tokio::join!(listener.accept(), connect);
        let (server_stream, server_addr) = accepted.unwrap();
        let mut client = client.unwrap();
        let (reader, writer) = server_stream.into_split();
        let session = Session::new(server_addr, writer);

        let log = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let log2 = log.clone();
        let count2 = count.clone();
        let root: Handler = Arc::new(move |payload: String, _session: Arc<Session>| -> crate::frame::BoxFuture {
            let log = log2.clone();
            let count = count2.clone();
            Box::pin(async move {
                log.lock().await.push(payload);
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        session.clone().run(reader, root);
        client.write_all(b"DISCONNECT\n").await.unwrap();

        for _ in 0..50 {
            if count.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(log.lock().await.as_slice(), &["DISCONNECT".to_string()]);
    }
}
