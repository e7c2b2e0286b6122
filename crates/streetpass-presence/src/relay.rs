//! TCP relay serving a [`PresenceTree`] to remote clients.
//!
//! Each connection gets its own [`TreeClient`]; when the socket closes, for
//! whatever reason, the client is closed and its disconnect actions run.
//! A frame longer than [`MAX_FRAME_BYTES`] gets a `bad_request` reply and
//! ends the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::WatchId;
use crate::tree::{PresenceTree, TreeClient};
use crate::wire::{ClientFrame, Request, ServerFrame, WireError, BAD_REQUEST};

/// Longest accepted client frame, newline excluded.
pub const MAX_FRAME_BYTES: u64 = 64 * 1024;

pub struct RelayServer {
    tree: Arc<PresenceTree>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind the relay on `addr`. Port 0 picks a free port.
    pub async fn bind(addr: &str, tree: Arc<PresenceTree>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { tree, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tree(&self) -> &Arc<PresenceTree> {
        &self.tree
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Relay listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let tree = Arc::clone(&self.tree);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(tree, stream, peer).await {
                            warn!("Connection {peer} error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {e}");
                }
            }
        }
    }
}

/// Serve one client connection.
async fn handle_connection(
    tree: Arc<PresenceTree>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    debug!("Relay client connected: {peer}");
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let mut line = serde_json::to_string(&frame)?;
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
        }
        writer.flush().await?;
        anyhow::Ok(())
    });

    let mut conn = Connection {
        client: TreeClient::new(tree),
        forwarders: HashMap::new(),
        out: out_tx,
    };

    let result = read_frames(&mut conn, reader).await;

    // Disconnect actions run no matter how the read loop ended.
    conn.close();
    drop(conn);
    match writer_task.await {
        Ok(Err(e)) => debug!("Relay writer for {peer} stopped: {e}"),
        Err(e) => warn!("Relay writer for {peer} panicked: {e}"),
        Ok(Ok(())) => {}
    }
    debug!("Relay client disconnected: {peer}");
    result
}

async fn read_frames(
    conn: &mut Connection,
    reader: tokio::net::tcp::OwnedReadHalf,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::new();

    loop {
        frame.clear();
        let bytes_read = (&mut reader)
            .take(MAX_FRAME_BYTES + 1)
            .read_until(b'\n', &mut frame)
            .await?;
        if bytes_read == 0 {
            break;
        }
        if frame.last() != Some(&b'\n') && bytes_read as u64 > MAX_FRAME_BYTES {
            warn!("Closing relay client after a frame over {MAX_FRAME_BYTES} bytes");
            let _ = conn
                .out
                .send(bad_request(format!("frame exceeds {MAX_FRAME_BYTES} bytes")));
            break;
        }
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let reply = match serde_json::from_slice::<ClientFrame>(&frame) {
            Ok(request) => conn.dispatch(request),
            Err(e) => bad_request(e.to_string()),
        };
        if conn.out.send(reply).is_err() {
            break;
        }
    }
    Ok(())
}

/// Reply to a frame that could not be read as a request.
fn bad_request(message: String) -> ServerFrame {
    ServerFrame::Reply {
        id: 0,
        result: None,
        error: Some(WireError {
            code: BAD_REQUEST.to_string(),
            message,
        }),
    }
}

struct Connection {
    client: TreeClient,
    /// Client watch id to the task forwarding its events.
    forwarders: HashMap<WatchId, (WatchId, JoinHandle<()>)>,
    out: mpsc::UnboundedSender<ServerFrame>,
}

impl Connection {
    fn dispatch(&mut self, frame: ClientFrame) -> ServerFrame {
        let id = frame.id;
        let result = match frame.request {
            Request::SignIn { identity } => self.client.sign_in(identity).map(|()| Value::Null),
            Request::Set { path, value } => self.client.set(&path, value).map(|()| Value::Null),
            Request::Update { path, fields } => {
                self.client.update(&path, fields).map(|()| Value::Null)
            }
            Request::Remove { path } => self.client.remove(&path).map(|()| Value::Null),
            Request::Get { path } => self.client.get(&path),
            Request::Watch { watch, path } => self.watch(watch, &path).map(|()| Value::Null),
            Request::Unwatch { watch } => {
                self.unwatch(watch);
                Ok(Value::Null)
            }
            Request::OnDisconnect { path, action } => self
                .client
                .on_disconnect(&path, action)
                .map(|()| Value::Null),
            Request::CancelOnDisconnect { path } => self
                .client
                .cancel_on_disconnect(&path)
                .map(|()| Value::Null),
            Request::Ping => Ok(Value::from("pong")),
        };
        ServerFrame::reply(id, result)
    }

    fn watch(&mut self, client_id: WatchId, path: &str) -> crate::Result<()> {
        // Reusing an id replaces the earlier watch.
        self.unwatch(client_id);

        let mut watch = self.client.watch(path)?;
        let out = self.out.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = watch.events.recv().await {
                if out.send(ServerFrame::event(client_id, event)).is_err() {
                    break;
                }
            }
        });
        self.forwarders.insert(client_id, (watch.id, task));
        Ok(())
    }

    fn unwatch(&mut self, client_id: WatchId) {
        if let Some((tree_id, task)) = self.forwarders.remove(&client_id) {
            self.client.unwatch(tree_id);
            task.abort();
        }
    }

    fn close(&mut self) {
        self.client.close();
        for (_, (_, task)) in self.forwarders.drain() {
            task.abort();
        }
    }
}
