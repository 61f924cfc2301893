use std::{io, path::PathBuf, sync::mpsc as std_mpsc, time::Duration};
use tabtodo_core::protocol::{
    encode_frame, ClientRole, Frame, NdjsonFrameDecoder, WireEnvelope, DEFAULT_MAX_FRAME_BYTES,
};
use tabtodo_core::ChannelMsg;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{unix::OwnedWriteHalf, UnixStream},
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub channel: String,
    pub socket_path: PathBuf,
    pub client_id: String,
    pub reconnect_delay: Duration,
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Keep this tab attached to the channel until shutdown.
///
/// Posts made while disconnected are dropped; the channel has no replay. After a
/// reconnect a local signal is delivered so the tab reloads what it missed.
pub async fn run_client(
    config: ClientConfig,
    mut outbound: mpsc::UnboundedReceiver<ChannelMsg>,
    inbound: std_mpsc::Sender<ChannelMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connected_before = false;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match UnixStream::connect(&config.socket_path).await {
            Ok(stream) => {
                info!(
                    event = "tab_channel_connected",
                    client_id = %config.client_id,
                    socket = %config.socket_path.display()
                );
                if connected_before && inbound.send(ChannelMsg::Signal).is_err() {
                    break;
                }
                connected_before = true;
                match session(&config, stream, &mut outbound, &inbound, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Disconnected => {
                        warn!(event = "tab_channel_disconnected", client_id = %config.client_id);
                    }
                }
            }
            Err(err) => {
                debug!(
                    event = "tab_channel_unavailable",
                    socket = %config.socket_path.display(),
                    error = %err
                );
            }
        }

        loop {
            match outbound.try_recv() {
                Ok(msg) => debug!(event = "tab_post_dropped", kind = msg.kind()),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(event = "tab_client_stop", client_id = %config.client_id);
}

async fn session(
    config: &ClientConfig,
    stream: UnixStream,
    outbound: &mut mpsc::UnboundedReceiver<ChannelMsg>,
    inbound: &std_mpsc::Sender<ChannelMsg>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut reader, mut writer) = stream.into_split();
    let hello = WireEnvelope::hello(&config.channel, &config.client_id, ClientRole::Tab);
    if let Err(err) = write_envelope(&mut writer, &hello).await {
        warn!(event = "tab_hello_failed", error = %err);
        return SessionEnd::Disconnected;
    }

    let mut decoder = NdjsonFrameDecoder::<WireEnvelope>::new(DEFAULT_MAX_FRAME_BYTES);
    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SessionEnd::Shutdown;
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    return SessionEnd::Shutdown;
                };
                let envelope = WireEnvelope::post(&config.channel, &config.client_id, msg);
                if let Err(err) = write_envelope(&mut writer, &envelope).await {
                    warn!(event = "tab_post_failed", error = %err);
                    return SessionEnd::Disconnected;
                }
            }
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => return SessionEnd::Disconnected,
                    Ok(n) => n,
                    Err(err) => {
                        warn!(event = "tab_read_error", error = %err);
                        return SessionEnd::Disconnected;
                    }
                };
                let report = decoder.push_chunk(&buf[..n]);
                for err in report.errors {
                    warn!(event = "tab_decode_error", error = %err);
                }
                for envelope in report.frames {
                    if envelope.channel != config.channel {
                        continue;
                    }
                    let Frame::Post(msg) = envelope.frame else {
                        continue;
                    };
                    if inbound.send(msg).is_err() {
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }
}

async fn write_envelope(writer: &mut OwnedWriteHalf, envelope: &WireEnvelope) -> io::Result<()> {
    let frame = encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tabtodo_core::protocol::decode_frame;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixListener;

    fn test_socket(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("tabtodo-client-test-{name}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("socket dir");
        dir.join("todo_updates.sock")
    }

    fn config(path: PathBuf) -> ClientConfig {
        ClientConfig {
            channel: "todo_updates".to_string(),
            socket_path: path,
            client_id: "tab-test".to_string(),
            reconnect_delay: Duration::from_millis(50),
        }
    }

    async fn read_envelope(reader: &mut BufReader<UnixStream>) -> WireEnvelope {
        let mut line = Vec::new();
        tokio::time::timeout(Duration::from_secs(3), reader.read_until(b'\n', &mut line))
            .await
            .expect("frame before timeout")
            .expect("read");
        decode_frame(&line, DEFAULT_MAX_FRAME_BYTES).expect("decode")
    }

    fn recv_inbound(rx: &std_mpsc::Receiver<ChannelMsg>) -> ChannelMsg {
        rx.recv_timeout(Duration::from_secs(3)).expect("inbound message")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hello_then_posts_flow_both_ways() {
        let path = test_socket("flow");
        let listener = UnixListener::bind(&path).expect("bind");
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = tokio::spawn(run_client(config(path.clone()), out_rx, in_tx, shutdown_rx));

        let (stream, _) = listener.accept().await.expect("accept");
        let mut server = BufReader::new(stream);
        let hello = read_envelope(&mut server).await;
        assert_eq!(
            hello.frame,
            Frame::Hello(tabtodo_core::protocol::HelloPayload {
                client_id: "tab-test".to_string(),
                role: ClientRole::Tab,
            })
        );

        out_tx.send(ChannelMsg::ClearHighlight).expect("queue post");
        let post = read_envelope(&mut server).await;
        assert_eq!(post.frame, Frame::Post(ChannelMsg::ClearHighlight));
        assert_eq!(post.sender_id, "tab-test");

        let frame = encode_frame(
            &WireEnvelope::post("todo_updates", "relay", ChannelMsg::Signal),
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("encode");
        server.get_mut().write_all(&frame).await.expect("write");
        assert_eq!(
            tokio::task::spawn_blocking(move || recv_inbound(&in_rx))
                .await
                .expect("join"),
            ChannelMsg::Signal
        );

        let _ = shutdown_tx.send(true);
        let _ = client.await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconnects_and_signals_reload() {
        let path = test_socket("reconnect");
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = tokio::spawn(run_client(config(path.clone()), out_rx, in_tx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(120)).await;
        let listener = UnixListener::bind(&path).expect("bind late");
        let (first, _) = listener.accept().await.expect("first accept");
        let mut first = BufReader::new(first);
        let _ = read_envelope(&mut first).await;
        drop(first);

        let (second, _) = listener.accept().await.expect("second accept");
        let mut second = BufReader::new(second);
        let hello = read_envelope(&mut second).await;
        assert!(matches!(hello.frame, Frame::Hello(_)));

        let received = tokio::task::spawn_blocking(move || recv_inbound(&in_rx))
            .await
            .expect("join");
        assert_eq!(received, ChannelMsg::Signal);

        let _ = shutdown_tx.send(true);
        let _ = client.await;
    }
}
