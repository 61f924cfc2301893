use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use tabtodo_core::{StoreChange, StoreError};
use tracing::{debug, warn};

/// Watch `root` for replacements of `<area>.json`.
pub(crate) fn watch_area(
    root: &Path,
    area: &str,
) -> Result<(RecommendedWatcher, Receiver<StoreChange>), StoreError> {
    let (tx, rx) = mpsc::channel();
    let file_name = format!("{area}.json");
    let area_name = area.to_string();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(event = "store_watch_error", error = %err);
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            let touches_area = event
                .paths
                .iter()
                .any(|path| path.file_name().is_some_and(|name| name == file_name.as_str()));
            if !touches_area {
                return;
            }
            debug!(event = "store_file_changed", area = %area_name, kind = ?event.kind);
            let _ = tx.send(StoreChange {
                area: area_name.clone(),
                keys: Vec::new(),
            });
        },
        Config::default(),
    )
    .map_err(|err| StoreError::Watch(err.to_string()))?;

    watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(|err| StoreError::Watch(err.to_string()))?;

    Ok((watcher, rx))
}
