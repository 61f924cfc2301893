mod channel;
mod relay;

use anyhow::Context;
use channel::{ChannelConfig, ChannelHub};
use clap::Parser;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tabtodo_core::paths::{
    resolve_channel, resolve_log_dir, resolve_log_level, resolve_socket, resolve_store_dir,
};
use tabtodo_core::store::LOCAL_AREA;
use tabtodo_core::KeyValueStore;
use tabtodo_store::FileStore;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

#[derive(Clone, Debug)]
struct Config {
    channel: String,
    socket_path: PathBuf,
    store_dir: PathBuf,
    debug: bool,
    write_timeout: Duration,
    queue_capacity: usize,
    log_dir: PathBuf,
}

#[derive(Parser, Debug)]
#[command(name = "tabtodo-relay", about = "Shared store watcher and tab broadcast channel")]
struct Args {
    #[arg(long, default_value = "")]
    channel: String,
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    store_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    if let Err(err) = run(config).await {
        error!(event = "relay_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = FileStore::local(&config.store_dir)
        .with_context(|| format!("open store at {}", config.store_dir.display()))?;
    let changes = store.subscribe().context("watch store")?;

    let hub = Arc::new(ChannelHub::new(ChannelConfig {
        channel: config.channel.clone(),
        socket_path: config.socket_path.clone(),
        write_timeout: config.write_timeout,
        queue_capacity: config.queue_capacity.max(1),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "relay_shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    let relay_task = tokio::spawn(relay::run_relay(
        hub.clone(),
        LOCAL_AREA.to_string(),
        relay::bridge_changes(changes),
        shutdown_rx.clone(),
    ));

    info!(
        event = "relay_ready",
        channel = %config.channel,
        store = %store.path().display()
    );
    channel::serve(hub, shutdown_rx)
        .await
        .with_context(|| format!("serve channel on {}", config.socket_path.display()))?;
    let _ = relay_task.await;
    drop(store);
    Ok(())
}

fn load_config() -> Config {
    let args = Args::parse();
    let channel = resolve_channel(&args.channel);
    Config {
        socket_path: resolve_socket(&args.socket, &channel),
        channel,
        store_dir: resolve_store_dir(&args.store_dir),
        debug: args.debug,
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        queue_capacity: args.queue_capacity,
        log_dir: resolve_log_dir(&args.log_dir),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = resolve_log_level(config.debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir, &config.channel) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Copies every log line to stdout and, when available, the relay log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &Path, channel: &str) -> io::Result<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("relay-{channel}.log"));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
