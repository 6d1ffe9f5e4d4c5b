//! Room push channel
//!
//! One WebSocket per open room. Inbound frames are parsed and appended to an
//! ordered log that the room session reads; outbound sends are fire-and-forget
//! and silently dropped while the socket is not open. Nothing is retried or
//! buffered across a disconnect: the next snapshot refetch is the backstop.

mod socket;

pub use socket::RoomSocket;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::models::{parse_push_frame, PushMessage};

/// What to do when an open channel drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Stay disconnected until the user asks for a reconnect.
    #[default]
    Manual,
    /// Reconnect with exponential backoff.
    Backoff,
}

/// Exponential reconnect delay: 1s, 2s, 4s, ... capped at 64s.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_secs: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { next_secs: 1 }
    }
}

impl Backoff {
    /// Connections that stayed up this long reset the backoff.
    pub const STABLE_AFTER: Duration = Duration::from_secs(60);
    const MAX_SECS: u64 = 64;

    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.next_secs);
        self.next_secs = (self.next_secs * 2).min(Self::MAX_SECS);
        delay
    }

    pub fn reset(&mut self) {
        self.next_secs = 1;
    }
}

/// Room socket URL for an API base URL: `http(s)` becomes `ws(s)`.
pub fn room_endpoint(api_url: &str, room_id: &str) -> Result<String> {
    let mut url = url::Url::parse(api_url.trim_end_matches('/'))
        .with_context(|| format!("Invalid API URL {}", api_url))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => anyhow::bail!("Unsupported API URL scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot use {} scheme for {}", scheme, api_url))?;
    let base_path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/api/ws/room/{}", base_path, room_id));
    Ok(url.to_string())
}

/// Append-only log of parsed push messages for one connection.
#[derive(Clone)]
pub struct PushLog {
    entries: Arc<Mutex<Vec<PushMessage>>>,
    len_tx: Arc<watch::Sender<usize>>,
}

impl Default for PushLog {
    fn default() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            entries: Arc::default(),
            len_tx: Arc::new(len_tx),
        }
    }
}

impl PushLog {
    /// Parse and append one frame. Malformed frames are dropped.
    pub fn ingest(&self, frame: &str) -> bool {
        match parse_push_frame(frame) {
            Some(message) => {
                self.push(message);
                true
            }
            None => false,
        }
    }

    pub fn push(&self, message: PushMessage) {
        let len = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.push(message);
            entries.len()
        };
        self.len_tx.send_replace(len);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Read the log without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&[PushMessage]) -> R) -> R {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&entries)
    }

    /// Notified with the new length after every append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }
}

/// Handle to one room's push connection.
///
/// Dropping the handle tears the connection down.
pub struct PushChannel {
    room_id: String,
    log: PushLog,
    connected_tx: Arc<watch::Sender<bool>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// A channel that never connected. Sends are no-ops.
    pub fn disconnected(room_id: impl Into<String>) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            room_id: room_id.into(),
            log: PushLog::default(),
            connected_tx: Arc::new(connected_tx),
            outbound: None,
            task: None,
        }
    }

    /// Open the room socket. Connection failures are logged and leave the
    /// channel in the disconnected state rather than failing the caller.
    pub async fn connect(ws_url: &str, room_id: &str, token: &str) -> Self {
        let mut channel = Self::disconnected(room_id);

        let socket = match RoomSocket::connect(ws_url, token).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!("Push channel for room {} unavailable: {:#}", room_id, e);
                return channel;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        channel.connected_tx.send_replace(true);
        channel.outbound = Some(tx);
        channel.task = Some(tokio::spawn(run_connection(
            socket,
            rx,
            channel.log.clone(),
            Arc::clone(&channel.connected_tx),
            room_id.to_string(),
        )));
        channel
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Notified whenever the connection opens or closes.
    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    pub fn log(&self) -> &PushLog {
        &self.log
    }

    /// Serialize and transmit if open. Returns whether the message was handed
    /// to the socket; delivery is never confirmed.
    pub fn send(&self, message: &PushMessage) -> bool {
        if !self.is_connected() {
            tracing::debug!(
                "Dropping {} for room {}: channel not open",
                message.kind(),
                self.room_id
            );
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to serialize {}: {}", message.kind(), e);
                return false;
            }
        };
        outbound.send(text).is_ok()
    }

    /// Close the socket (if open) and wait for the connection task to finish.
    pub async fn close(mut self) {
        // Dropping the sender asks the connection task to send a close frame.
        self.outbound = None;
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                tracing::debug!("Push channel for room {} did not close in time", self.room_id);
            }
        }
        self.connected_tx.send_replace(false);
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected_tx.send_replace(false);
    }
}

/// Pump frames between the socket, the log and the outbound queue until the
/// socket closes or the handle goes away.
async fn run_connection(
    mut socket: RoomSocket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    log: PushLog,
    connected: Arc<watch::Sender<bool>>,
    room_id: String,
) {
    loop {
        tokio::select! {
            frame = socket.recv_text() => match frame {
                Ok(Some(text)) => {
                    log.ingest(&text);
                }
                Ok(None) => {
                    tracing::info!("Push channel for room {} closed by server", room_id);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Push channel for room {} failed: {:#}", room_id, e);
                    break;
                }
            },
            msg = outbound.recv() => match msg {
                Some(text) => {
                    if let Err(e) = socket.send_text(&text).await {
                        tracing::warn!("Push send for room {} failed: {:#}", room_id, e);
                        break;
                    }
                }
                None => {
                    tracing::info!("Closing push channel for room {}", room_id);
                    connected.send_replace(false);
                    socket.close().await;
                    return;
                }
            },
        }
    }
    connected.send_replace(false);
}
