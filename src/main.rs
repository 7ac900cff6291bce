//! Broadcast TCP Chat - Entry Point
//!
//! Terminal host for the server and client multiplexers. The multiplexer
//! runs on its own thread; this side prints its events and feeds stdin
//! lines to the client.

use std::fmt::Display;
use std::io::BufRead;
use std::thread;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tchat::config::{DEFAULT_HOST, DEFAULT_PORT};
use tchat::{Client, ClientConfig, Server, ServerConfig};

#[derive(Parser)]
#[command(name = "tchat")]
#[command(about = "Single-threaded broadcast chat over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept clients and rebroadcast every message to all of them
    Server(ServerArgs),

    /// Connect to a server, send stdin lines, print what comes back
    Client(ClientArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Address to bind to
    #[arg(short = 'b', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Parser)]
struct ClientArgs {
    /// Server host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name prefixed to every line sent
    #[arg(short, long, default_value = "anonymous")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=tchat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args, cli.json).await,
        Commands::Client(args) => run_client(args, cli.json).await,
    }
}

async fn run_server(args: ServerArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = Server::start(ServerConfig::new(args.host, args.port), tx)?;
    let stop = server.stop_handle();

    let worker = thread::Builder::new()
        .name("tchat-server".to_string())
        .spawn(move || server.run())?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping server");
            stop.stop();
        }
    });

    // Ends once the server loop drops its sender
    while let Some(event) = rx.recv().await {
        print_event(&event, json)?;
    }

    worker.join().map_err(|_| "server thread panicked")??;
    Ok(())
}

async fn run_client(args: ClientArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut config = ClientConfig::new(args.host, args.port);
    config.name = args.name;
    let name = config.name.clone();

    let client = Client::connect(config, tx)?;
    let handle = client.handle();

    let worker = thread::Builder::new()
        .name("tchat-client".to_string())
        .spawn(move || client.run())?;

    // Detached blocking stdin reader
    let input = handle.clone();
    thread::Builder::new()
        .name("tchat-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if input.message(format!("{}: {}", name, line)).is_err() {
                    break;
                }
            }
            input.stop();
        })?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, disconnecting");
            handle.stop();
        }
    });

    while let Some(event) = rx.recv().await {
        print_event(&event, json)?;
    }

    if let Err(e) = worker.join().map_err(|_| "client thread panicked")? {
        error!("Client loop error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn print_event<E: Serialize + Display>(event: &E, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", event);
    }
    Ok(())
}
