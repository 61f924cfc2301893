use crate::protocol::DEFAULT_CHANNEL;
use std::path::PathBuf;

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn flag_or_env(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub fn resolve_channel(channel_flag: &str) -> String {
    flag_or_env(channel_flag, "TABTODO_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
}

pub fn resolve_store_dir(store_dir_flag: &str) -> PathBuf {
    if let Some(value) = flag_or_env(store_dir_flag, "TABTODO_STORE_DIR") {
        return PathBuf::from(value);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("tabtodo"))
        .unwrap_or_else(|| PathBuf::from(".tabtodo/store"))
}

pub fn resolve_socket(socket_flag: &str, channel: &str) -> PathBuf {
    if let Some(value) = flag_or_env(socket_flag, "TABTODO_SOCKET") {
        return PathBuf::from(value);
    }
    let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    base.join("tabtodo").join(format!("{}.sock", sanitize(channel)))
}

pub fn resolve_log_dir(log_dir_flag: &str) -> PathBuf {
    flag_or_env(log_dir_flag, "TABTODO_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".tabtodo/logs"))
}

pub fn resolve_log_level(debug: bool) -> String {
    if debug || env_true("TABTODO_DEBUG") {
        return "debug".to_string();
    }
    match std::env::var("TABTODO_LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => level,
        _ => "info".to_string(),
    }
}

fn sanitize(channel: &str) -> String {
    channel
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
