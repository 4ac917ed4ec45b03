//! cachewire server entry point.

use cachewire::server::LogLevel;
use cachewire::{Config, Server, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("cachewire version {VERSION}");
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        match Config::load_from_file(config_path) {
            Ok(cfg) => {
                eprintln!("Loaded configuration from: {}", config_path.display());
                cfg
            }
            Err(e) => {
                eprintln!("Error loading config file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Override with CLI arguments
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(logfile) = cli.logfile {
        config.logfile = Some(logfile);
    }
    if let Some(loglevel) = cli.loglevel {
        config.loglevel = loglevel;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.as_filter()));

    if let Some(ref logfile) = config.logfile {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)?;

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(file)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .init();
    }

    info!(
        "cachewire {} starting on {}:{} (node {})",
        VERSION, config.bind, config.port, config.node_id
    );

    let server = Arc::new(Server::new(config));

    // Handle shutdown signals
    let server_clone = server.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received shutdown signal");
        server_clone.shutdown();
    });

    server.run().await?;
    Ok(())
}

/// CLI arguments
#[derive(Default)]
struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
    logfile: Option<PathBuf>,
    loglevel: Option<LogLevel>,
    help: bool,
    version: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                cli.config = args.get(i).map(PathBuf::from);
            }
            "--port" | "-p" => {
                i += 1;
                cli.port = args.get(i).and_then(|s| s.parse().ok());
            }
            "--bind" | "-b" => {
                i += 1;
                cli.bind = args.get(i).cloned();
            }
            "--logfile" => {
                i += 1;
                cli.logfile = args.get(i).map(PathBuf::from);
            }
            "--loglevel" => {
                i += 1;
                cli.loglevel = args.get(i).and_then(|level| LogLevel::parse(level));
            }
            "--help" | "-h" => {
                cli.help = true;
            }
            "--version" | "-v" => {
                cli.version = true;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {arg}");
                cli.help = true;
            }
            // redis-server style: a bare argument is the config file
            path => {
                cli.config = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    cli
}

fn print_help() {
    println!(
        r"cachewire {VERSION} - Redis-compatible transactional cache server

USAGE:
    cachewire-server [CONFIG] [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Load configuration from file
    -p, --port <PORT>        Set the server port (default: 6379)
    -b, --bind <ADDR>        Set the bind address (default: 127.0.0.1)
        --logfile <FILE>     Log to a file instead of stdout
        --loglevel <LEVEL>   debug, verbose, notice or warning
    -h, --help               Print this help
    -v, --version            Print version

Transaction limits, node id and expiry tuning are set in the config file:
    node-id, max-watchers, max-transactions, transaction-timeout,
    active-expire-interval, active-expire-keys, read-only"
    );
}
