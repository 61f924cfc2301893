mod ops;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabtodo_core::paths::{resolve_channel, resolve_socket, resolve_store_dir};
use tabtodo_core::protocol::{
    encode_frame, ClientRole, Frame, NdjsonFrameDecoder, WireEnvelope, DEFAULT_MAX_FRAME_BYTES,
};
use tabtodo_store::FileStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "tabtodo")]
#[command(about = "Edit the shared todo list from the shell", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = "")]
    store_dir: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the list, active todos first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Append a new active todo
    Add { text: String },
    /// Flip the done flag of one todo
    Toggle { index: usize },
    /// Replace the text of one todo
    Edit { index: usize, text: String },
    /// Move a todo to another position in the stored list
    Move { from: usize, to: usize },
    /// Print every message posted on the channel
    Watch {
        #[arg(long, default_value = "")]
        channel: String,
        #[arg(long, default_value = "")]
        socket: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store_dir = resolve_store_dir(&cli.store_dir);
    let open = || {
        FileStore::local(&store_dir)
            .with_context(|| format!("open store at {}", store_dir.display()))
    };

    match cli.command {
        Commands::List { json } => {
            let todos = ops::list(&open()?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&todos)?);
            } else if todos.is_empty() {
                println!("No todos in {}", store_dir.display());
            } else {
                print!("{}", ops::format_list(&todos));
            }
        }
        Commands::Add { text } => {
            let index = ops::add(&open()?, &text)?;
            println!("Added #{index}");
        }
        Commands::Toggle { index } => {
            let done = ops::toggle(&open()?, index)?;
            println!("#{index} {}", if done { "done" } else { "active" });
        }
        Commands::Edit { index, text } => {
            ops::edit(&open()?, index, &text)?;
            println!("Edited #{index}");
        }
        Commands::Move { from, to } => {
            ops::move_todo(&open()?, from, to)?;
            println!("Moved #{from} to #{to}");
        }
        Commands::Watch { channel, socket } => {
            let channel = resolve_channel(&channel);
            let socket = resolve_socket(&socket, &channel);
            let runtime = tokio::runtime::Runtime::new().context("start runtime")?;
            runtime.block_on(watch(&channel, &socket))?;
        }
    }

    Ok(())
}

async fn watch(channel: &str, socket: &std::path::Path) -> Result<()> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connect to {}", socket.display()))?;
    let client_id = format!("cli-watch-{}", std::process::id());
    let hello = WireEnvelope::hello(channel, &client_id, ClientRole::Observer);
    stream
        .write_all(&encode_frame(&hello, DEFAULT_MAX_FRAME_BYTES)?)
        .await
        .context("send hello")?;
    println!("Watching {channel} on {}", socket.display());

    let mut decoder = NdjsonFrameDecoder::<WireEnvelope>::new(DEFAULT_MAX_FRAME_BYTES);
    let mut buf = vec![0u8; 8192];
    loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => read.context("read channel")?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        if n == 0 {
            println!("Channel closed");
            return Ok(());
        }
        let report = decoder.push_chunk(&buf[..n]);
        for err in report.errors {
            eprintln!("bad frame: {err}");
        }
        for envelope in report.frames {
            if let Frame::Post(msg) = envelope.frame {
                println!(
                    "{} {} {}",
                    envelope.timestamp,
                    envelope.sender_id,
                    serde_json::to_string(&msg)?
                );
            }
        }
    }
}
