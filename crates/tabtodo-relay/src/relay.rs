use crate::channel::ChannelHub;
use std::sync::{mpsc as std_mpsc, Arc};
use tabtodo_core::{ChannelMsg, StoreChange};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub const RELAY_SENDER_ID: &str = "relay";

/// Move store notifications off the watcher thread and into the runtime.
///
/// The forwarding thread exits once either side hangs up.
pub fn bridge_changes(changes: std_mpsc::Receiver<StoreChange>) -> mpsc::UnboundedReceiver<StoreChange> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(change) = changes.recv() {
            if tx.send(change).is_err() {
                break;
            }
        }
    });
    rx
}

/// Turn every change to `area` into a bare update signal on the channel.
///
/// Changes to other areas are ignored. The signal carries no state; receivers
/// re-read the store themselves.
pub async fn run_relay(
    hub: Arc<ChannelHub>,
    area: String,
    mut changes: mpsc::UnboundedReceiver<StoreChange>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(event = "relay_start", channel = %hub.channel(), area = %area);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            change = changes.recv() => {
                let Some(change) = change else {
                    break;
                };
                if change.area != area {
                    debug!(event = "relay_skip_area", area = %change.area);
                    continue;
                }
                debug!(event = "relay_signal", keys = ?change.keys);
                hub.publish(RELAY_SENDER_ID, ChannelMsg::Signal).await;
            }
        }
    }
    info!(event = "relay_stop", channel = %hub.channel());
}
