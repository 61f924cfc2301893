use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
#[cfg(unix)]
use std::{fs, os::unix::fs::PermissionsExt};
use tabtodo_core::protocol::{
    decode_frame, encode_frame, ChannelMsg, ClientRole, Frame, WireEnvelope,
    DEFAULT_MAX_FRAME_BYTES,
};
#[cfg(unix)]
use tokio::net::{
    unix::{OwnedReadHalf, OwnedWriteHalf},
    UnixListener, UnixStream,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{mpsc, watch, RwLock},
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub channel: String,
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
}

#[derive(Clone)]
struct ClientEntry {
    client_id: String,
    role: ClientRole,
    sender: mpsc::Sender<WireEnvelope>,
}

/// Named broadcast channel shared by every tab.
///
/// A post reaches every other live client exactly as sent. There is no replay for
/// late joiners and no ordering between different senders.
pub struct ChannelHub {
    config: ChannelConfig,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl ChannelHub {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Post from inside the hub process. Reaches every connected client.
    pub async fn publish(&self, sender_id: &str, msg: ChannelMsg) {
        let envelope = WireEnvelope::post(&self.config.channel, sender_id, msg);
        self.fan_out(None, envelope).await;
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("channel-conn-{id}")
    }

    async fn register_client(&self, conn_id: &str, client: ClientEntry) {
        info!(
            event = "channel_client_connected",
            conn_id = conn_id,
            client_id = %client.client_id,
            role = ?client.role,
        );
        self.clients
            .write()
            .await
            .insert(conn_id.to_string(), client);
    }

    async fn unregister_client(&self, conn_id: &str) {
        if self.clients.write().await.remove(conn_id).is_some() {
            info!(event = "channel_client_disconnected", conn_id = conn_id);
        }
    }

    async fn fan_out(&self, from_conn: Option<&str>, envelope: WireEnvelope) {
        let clients = self.clients.read().await.clone();
        let mut dropped = Vec::new();

        for (conn_id, client) in clients {
            if Some(conn_id.as_str()) == from_conn {
                continue;
            }
            match client.sender.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(conn_id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = "channel_slow_consumer", conn_id = %conn_id);
                    dropped.push(conn_id);
                }
            }
        }

        for conn_id in dropped {
            self.unregister_client(&conn_id).await;
        }
    }

    #[cfg(unix)]
    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let conn_id = self.next_conn_id();
        let (reader_half, writer_half) = stream.into_split();
        let mut reader = BufReader::new(reader_half);

        let Some(hello) = read_next_valid_frame(&mut reader).await else {
            return;
        };
        if !hello.version.is_supported() {
            warn!(
                event = "channel_unsupported_version",
                conn_id = %conn_id,
                version = hello.version.0
            );
            return;
        }
        if hello.channel != self.config.channel {
            warn!(
                event = "channel_name_mismatch",
                conn_id = %conn_id,
                msg_channel = %hello.channel,
                expected_channel = %self.config.channel
            );
            return;
        }
        let Frame::Hello(payload) = hello.frame else {
            warn!(event = "channel_expected_hello", conn_id = %conn_id);
            return;
        };

        let (tx, rx) = mpsc::channel::<WireEnvelope>(self.config.queue_capacity);
        let write_timeout = self.config.write_timeout;
        let conn_for_writer = conn_id.clone();
        let mut writer_task = tokio::spawn(async move {
            writer_loop(conn_for_writer, writer_half, rx, write_timeout).await;
        });

        let role = payload.role;
        self.register_client(
            &conn_id,
            ClientEntry {
                client_id: payload.client_id,
                role,
                sender: tx,
            },
        )
        .await;

        // The hub holds the only sender; once it unregisters this client the writer
        // ends and the peer sees EOF.
        let mut writer_done = false;
        loop {
            let next = tokio::select! {
                frame = read_next_valid_frame(&mut reader) => frame,
                _ = &mut writer_task => {
                    writer_done = true;
                    debug!(event = "channel_writer_closed", conn_id = %conn_id);
                    None
                }
            };
            let Some(envelope) = next else {
                break;
            };
            if !envelope.version.is_supported() {
                warn!(
                    event = "channel_skip_version",
                    conn_id = %conn_id,
                    version = envelope.version.0
                );
                continue;
            }
            if envelope.channel != self.config.channel {
                warn!(
                    event = "channel_message_mismatch",
                    conn_id = %conn_id,
                    msg_channel = %envelope.channel
                );
                break;
            }

            match (role, envelope.frame.clone()) {
                (ClientRole::Tab, Frame::Post(msg)) => {
                    debug!(
                        event = "channel_post",
                        conn_id = %conn_id,
                        sender_id = %envelope.sender_id,
                        kind = msg.kind()
                    );
                    self.fan_out(Some(&conn_id), envelope).await;
                }
                (ClientRole::Observer, Frame::Post(_)) => {
                    debug!(event = "channel_observer_post_ignored", conn_id = %conn_id);
                }
                (_, Frame::Hello(_)) => {
                    warn!(event = "channel_unexpected_hello", conn_id = %conn_id);
                }
            }
        }

        self.unregister_client(&conn_id).await;
        if !writer_done {
            let _ = writer_task.await;
        }
    }
}

#[cfg(not(unix))]
pub async fn serve(_hub: Arc<ChannelHub>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn serve(hub: Arc<ChannelHub>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let socket_path = hub.config.socket_path.clone();
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }
    if socket_path.exists() {
        let _ = fs::remove_file(&socket_path);
    }

    let listener = UnixListener::bind(&socket_path)?;
    let _ = fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o600));

    info!(
        event = "channel_start",
        channel = %hub.config.channel,
        socket = %socket_path.display(),
        queue_capacity = hub.config.queue_capacity
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            hub.handle_connection(stream).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "channel_accept_error", error = %err);
                    }
                }
            }
        }
    }

    let _ = fs::remove_file(&socket_path);
    let clients = hub.client_count().await;
    info!(
        event = "channel_stop",
        channel = %hub.config.channel,
        clients = clients
    );
    Ok(())
}

#[cfg(unix)]
async fn writer_loop(
    conn_id: String,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<WireEnvelope>,
    write_timeout: Duration,
) {
    while let Some(envelope) = rx.recv().await {
        let frame = match encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "channel_encode_error", conn_id = %conn_id, error = %err);
                continue;
            }
        };
        let send = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(event = "channel_write_error", conn_id = %conn_id, error = %err);
                break;
            }
            Err(_) => {
                warn!(event = "channel_write_timeout", conn_id = %conn_id);
                break;
            }
        }
    }
}

#[cfg(unix)]
async fn read_next_valid_frame(reader: &mut BufReader<OwnedReadHalf>) -> Option<WireEnvelope> {
    loop {
        let mut line = Vec::new();
        let n = match reader.read_until(b'\n', &mut line).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "channel_read_error", error = %err);
                return None;
            }
        };
        if n == 0 {
            return None;
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match decode_frame::<WireEnvelope>(&line, DEFAULT_MAX_FRAME_BYTES) {
            Ok(envelope) => return Some(envelope),
            Err(err) => {
                warn!(event = "channel_decode_error", error = %err);
                continue;
            }
        }
    }
}
