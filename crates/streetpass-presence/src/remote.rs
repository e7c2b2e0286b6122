//! TCP client of a [`RelayServer`](crate::RelayServer).
//!
//! One writer task drains an outbound frame queue; one reader task routes
//! replies to their pending request and events to their watch. When the
//! connection drops, every pending request fails and every watch receives
//! a final `Disconnected` error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use streetpass_types::Identity;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::{Backend, DisconnectAction, Watch, WatchEvent, WatchId};
use crate::wire::{self, ClientFrame, Request, ServerFrame};
use crate::{PresenceError, Result};

/// Default time to wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type Watches = Arc<Mutex<HashMap<WatchId, mpsc::UnboundedSender<WatchEvent>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RemoteBackend {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    pending: Pending,
    watches: Watches,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl RemoteBackend {
    /// Connect to the relay at `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to relay at {addr}");
        let (read_half, write_half) = stream.into_split();

        let (outbound, queue) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();
        let watches: Watches = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(write_half, queue));
        tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&watches),
            Arc::clone(&connected),
        ));

        Ok(Self {
            outbound,
            pending,
            watches,
            next_id: AtomicU64::new(1),
            connected,
            timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<()> {
        self.request(Request::Ping).await.map(|_| ())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(PresenceError::Disconnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| PresenceError::Disconnected)
    }

    async fn request(&self, request: Request) -> Result<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.send(ClientFrame { id, request }) {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PresenceError::Disconnected),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(PresenceError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

impl Backend for RemoteBackend {
    async fn sign_in(&self, identity: &Identity) -> Result<()> {
        self.request(Request::SignIn {
            identity: identity.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.request(Request::Set {
            path: path.to_string(),
            value,
        })
        .await
        .map(|_| ())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.request(Request::Update {
            path: path.to_string(),
            fields,
        })
        .await
        .map(|_| ())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.request(Request::Remove {
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(Request::Get {
            path: path.to_string(),
        })
        .await
    }

    async fn watch(&self, path: &str) -> Result<Watch> {
        let id = self.next_id();
        let (tx, events) = mpsc::unbounded_channel();
        lock(&self.watches).insert(id, tx);

        let result = self
            .request(Request::Watch {
                watch: id,
                path: path.to_string(),
            })
            .await;
        match result {
            Ok(_) => Ok(Watch { id, events }),
            Err(e) => {
                lock(&self.watches).remove(&id);
                Err(e)
            }
        }
    }

    fn unwatch(&self, id: WatchId) {
        if lock(&self.watches).remove(&id).is_none() {
            return;
        }
        // The reply has no pending entry and is discarded by the reader.
        let frame = ClientFrame {
            id: self.next_id(),
            request: Request::Unwatch { watch: id },
        };
        if self.send(frame).is_err() {
            debug!(watch = id, "Unwatch not sent, relay connection is gone");
        }
    }

    async fn on_disconnect(&self, path: &str, action: DisconnectAction) -> Result<()> {
        self.request(Request::OnDisconnect {
            path: path.to_string(),
            action,
        })
        .await
        .map(|_| ())
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<()> {
        self.request(Request::CancelOnDisconnect {
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<ClientFrame>) {
    while let Some(frame) = queue.recv().await {
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping unencodable frame: {e}");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("Relay write failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    reader: OwnedReadHalf,
    pending: Pending,
    watches: Watches,
    connected: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Relay closed the connection");
                break;
            }
            Err(e) => {
                warn!("Relay read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ServerFrame>(&line) {
            Ok(ServerFrame::Reply { id, result, error }) => {
                if let Some(tx) = lock(&pending).remove(&id) {
                    let _ = tx.send(wire::outcome(result, error));
                }
            }
            Ok(ServerFrame::Event {
                watch,
                value,
                error,
            }) => {
                let mut routes = lock(&watches);
                let delivered = routes
                    .get(&watch)
                    .is_some_and(|tx| tx.send(wire::outcome(value, error)).is_ok());
                if !delivered {
                    routes.remove(&watch);
                }
            }
            Err(e) => warn!("Ignoring malformed relay frame: {e}"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    for (_, tx) in lock(&pending).drain() {
        let _ = tx.send(Err(PresenceError::Disconnected));
    }
    for (_, tx) in lock(&watches).drain() {
        let _ = tx.send(Err(PresenceError::Disconnected));
    }
}
