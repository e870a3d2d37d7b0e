//! FlashRESP demo server
//!
//! Runs the protocol engine with a handful of example commands backed by
//! an in-memory map, so it can be poked at with `redis-cli`.

use bytes::Bytes;
use flashresp::{ArrayMode, Request, Response, ServerBuilder, ServerConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Close connections idle for this many seconds
    idle_timeout: Option<u64>,
    /// Keep nested arrays instead of flattening them
    nested_arrays: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: flashresp::DEFAULT_HOST.to_string(),
            port: flashresp::DEFAULT_PORT,
            idle_timeout: None,
            nested_arrays: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i).to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--idle-timeout" => {
                    let secs = value_of(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid idle timeout");
                        std::process::exit(1);
                    });
                    config.idle_timeout = Some(secs);
                    i += 2;
                }
                "--nested-arrays" => {
                    config.nested_arrays = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashRESP version {}", flashresp::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            array_mode: if self.nested_arrays {
                ArrayMode::Nested
            } else {
                ArrayMode::Flatten
            },
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
            ..ServerConfig::default()
        }
    }
}

fn value_of(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
FlashRESP - An Embeddable RESP Server Engine (demo server)

USAGE:
    flashresp [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>           Port to listen on (default: 6379)
        --idle-timeout <SECS>   Close connections idle for this long
        --nested-arrays         Keep nested request arrays instead of flattening
    -v, --version               Print version information
        --help                  Print this help message

COMMANDS:
    PING [message], ECHO message, SET key value, GET key, DEL key [key ...], COMMAND
"#
    );
}

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

fn wrong_args(req: &Request) -> String {
    format!(
        "ERR wrong number of arguments for '{}' command",
        req.command.to_lowercase()
    )
}

fn arg(req: &Request, index: usize) -> Option<Bytes> {
    req.arg_bytes(index).map(Bytes::copy_from_slice)
}

fn build_server(store: Store, config: ServerConfig) -> flashresp::Server {
    let set_store = Arc::clone(&store);
    let get_store = Arc::clone(&store);
    let del_store = store;

    ServerBuilder::new()
        .config(config)
        .handle("ping", |req, w| {
            Box::pin(async move {
                match arg(&req, 0) {
                    Some(message) => w.write_bulk_string(message).await?,
                    None => w.write_string("PONG").await?,
                }
                Ok(())
            })
        })
        .handle("echo", |req, w| {
            Box::pin(async move {
                match (arg(&req, 0), req.arguments.len()) {
                    (Some(message), 1) => w.write_bulk_string(message).await?,
                    _ => w.write_error(wrong_args(&req)).await?,
                }
                Ok(())
            })
        })
        .handle("set", move |req, w| {
            let store = Arc::clone(&set_store);
            Box::pin(async move {
                match (arg(&req, 0), arg(&req, 1), req.arguments.len()) {
                    (Some(key), Some(value), 2) => {
                        store
                            .lock()
                            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?
                            .insert(key, value);
                        w.write_response(Response::ok()).await?;
                    }
                    _ => w.write_error(wrong_args(&req)).await?,
                }
                Ok(())
            })
        })
        .handle("get", move |req, w| {
            let store = Arc::clone(&get_store);
            Box::pin(async move {
                match (arg(&req, 0), req.arguments.len()) {
                    (Some(key), 1) => {
                        let value = store
                            .lock()
                            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?
                            .get(&key)
                            .cloned();
                        w.write_response(value).await?;
                    }
                    _ => w.write_error(wrong_args(&req)).await?,
                }
                Ok(())
            })
        })
        .handle("del", move |req, w| {
            let store = Arc::clone(&del_store);
            Box::pin(async move {
                if req.arguments.is_empty() {
                    w.write_error(wrong_args(&req)).await?;
                    return Ok(());
                }
                let removed = {
                    let mut map = store
                        .lock()
                        .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
                    (0..req.arguments.len())
                        .filter_map(|i| arg(&req, i))
                        .filter(|key| map.remove(key).is_some())
                        .count()
                };
                w.write_int(removed as i64).await?;
                Ok(())
            })
        })
        .handle("command", |_req, w| {
            Box::pin(async move {
                // redis-cli asks for command docs on connect; an empty list is fine.
                w.write_array(Some(vec![])).await?;
                Ok(())
            })
        })
        .bad_request_handler(|err, w| {
            Box::pin(async move {
                let _ = w.write_error(format!("ERR {}", err)).await;
            })
        })
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    let server = build_server(store, config.server_config());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        "FlashRESP v{} listening on {}",
        flashresp::VERSION,
        config.bind_address()
    );

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.serve_with_shutdown(listener, shutdown).await;

    let stats = server.stats();
    info!(
        connections = stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed),
        requests = stats
            .requests_processed
            .load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
