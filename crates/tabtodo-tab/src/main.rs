mod app;
mod client;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use client::ClientConfig;
use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        Event, KeyEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Mutex},
    time::Duration,
};
use tabtodo_core::paths::{
    resolve_channel, resolve_log_dir, resolve_log_level, resolve_socket, resolve_store_dir,
};
use tabtodo_core::tab::{CommitEcho, Outbox};
use tabtodo_core::{ChannelMsg, KeyValueStore, TabController};
use tabtodo_store::FileStore;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tabtodo-tab", about = "One todo list tab attached to the shared channel")]
struct Args {
    #[arg(long, default_value = "")]
    channel: String,
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    store_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    /// Send this tab's app state along with the update that follows an edit.
    #[arg(long, default_value_t = false)]
    echo_app_state: bool,
    #[arg(long, default_value_t = 1000)]
    reconnect_ms: u64,
}

struct Config {
    channel: String,
    socket_path: PathBuf,
    store_dir: PathBuf,
    debug: bool,
    log_dir: PathBuf,
    commit_echo: CommitEcho,
    reconnect_delay: Duration,
}

fn main() -> Result<()> {
    let config = load_config();
    init_logging(&config);

    let store = FileStore::local(&config.store_dir)
        .with_context(|| format!("open store at {}", config.store_dir.display()))?;
    let outbox = Outbox::new();
    let controller =
        TabController::new(store, outbox.clone()).with_commit_echo(config.commit_echo);
    let tab_id = controller.tab_id().to_string();
    let mut app = app::App::new(controller, outbox);
    app.load();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("start runtime")?;
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = std_mpsc::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client_task = runtime.spawn(client::run_client(
        ClientConfig {
            channel: config.channel.clone(),
            socket_path: config.socket_path.clone(),
            client_id: tab_id.clone(),
            reconnect_delay: config.reconnect_delay,
        },
        out_rx,
        in_tx,
        shutdown_rx,
    ));
    info!(event = "tab_start", tab_id = %tab_id, channel = %config.channel);

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &in_rx, &out_tx);
    restore_terminal(&mut terminal)?;

    let _ = shutdown_tx.send(true);
    let _ = runtime.block_on(client_task);
    info!(event = "tab_stop", tab_id = %tab_id);
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableFocusChange
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_app<S: KeyValueStore>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut app::App<S>,
    inbound: &std_mpsc::Receiver<ChannelMsg>,
    outbound: &mpsc::UnboundedSender<ChannelMsg>,
) -> Result<()> {
    let input_poll = Duration::from_millis(50);

    loop {
        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(input_poll)? {
            match event::read()? {
                Event::Key(key) => {
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                        app.handle_key(key);
                    }
                }
                Event::Mouse(mouse) => {
                    app.handle_mouse(mouse);
                }
                Event::FocusLost => {
                    app.handle_focus_lost();
                }
                Event::FocusGained => {
                    app.handle_focus_gained();
                }
                _ => {}
            }
        }

        while let Ok(msg) = inbound.try_recv() {
            app.handle_message(&msg);
        }

        for msg in app.take_outgoing() {
            let _ = outbound.send(msg);
        }

        if app.should_quit() {
            break;
        }
    }

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
        log_dir: resolve_log_dir(&args.log_dir),
        commit_echo: if args.echo_app_state {
            CommitEcho::Snapshot
        } else {
            CommitEcho::Bare
        },
        reconnect_delay: Duration::from_millis(args.reconnect_ms.max(50)),
    }
}

/// Log to a file only; stdout belongs to the terminal UI.
fn init_logging(config: &Config) {
    let level = resolve_log_level(config.debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let make_writer = match open_log_file(&config.log_dir) {
        Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
        Err(_) => BoxMakeWriter::new(io::sink),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn open_log_file(log_dir: &Path) -> io::Result<std::fs::File> {
    std::fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("tab.log"))
}
