//! Parlor TCP chat
//!
//! Usage:
//!   cargo run -- server                      # Run the chat server on 54060
//!   cargo run -- server --port 6000          # Run on a specific port
//!   cargo run -- client 127.0.0.1            # Join a running server

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;

use anyhow::{Context, anyhow};
use parlor::terminal::{RawModeGuard, StdioConsole, spawn_stdin_reader};
use parlor::{ChatClient, ChatConfig, ChatError, ChatServer, DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout belongs to the chat pane
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let result = match args[1].as_str() {
        "server" => run_server(&args).await,
        "client" => match args.get(2) {
            Some(host) => run_client(host, &args).await,
            None => {
                eprintln!("Missing host for client");
                print_usage();
                return ExitCode::from(2);
            }
        },
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e.downcast_ref::<ChatError>().map_or(1, ChatError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn print_usage() {
    println!("Parlor - TCP Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!("    cargo run -- client <HOST> [--port <PORT>]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    client <HOST>       Join a chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on / connect to (default: {})", DEFAULT_PORT);
    println!("    --max-conn <NUM>    Maximum connected users (default: 10)");
    println!("    --config <PATH>     Load server settings from a JSON file");
    println!();
    println!("SERVER CONSOLE:");
    println!("    Lines typed at the server terminal go to every user as SERVER.");
    println!("    Ctrl-C stops the server.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server --max-conn 4");
    println!("    cargo run -- client localhost --port 6000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_option<T: std::str::FromStr>(args: &[String], name: &str) -> anyhow::Result<Option<T>> {
    match option_value(args, name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!(ChatError::config(format!("Invalid value for {}: {}", name, raw)))),
        None => Ok(None),
    }
}

fn load_config(args: &[String]) -> anyhow::Result<ChatConfig> {
    let mut config = match option_value(args, "--config") {
        Some(path) => ChatConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => ChatConfig::default(),
    };
    if let Some(port) = parse_option(args, "--port")? {
        config.port = port;
    }
    if let Some(capacity) = parse_option(args, "--max-conn")? {
        config.capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

async fn run_server(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;

    info!("Configuration:");
    info!("  - Port: {}", config.port);
    info!("  - Max connections: {}", config.capacity);
    info!("  - Max line length: {}", config.max_line_length);

    let server = ChatServer::bind(config)
        .await
        .context("Failed to start chat server")?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received");
            shutdown.cancel();
        }
    });

    let raw_mode = RawModeGuard::enable().context("Failed to configure terminal")?;
    let console = StdioConsole::new(raw_mode.is_some());
    let result = server.run(console, Some(spawn_stdin_reader())).await;
    drop(raw_mode);
    println!();

    result?;
    Ok(())
}

fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?
        .next()
        .ok_or_else(|| anyhow!("No address found for {}", host))
}

async fn prompt_reply(input: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<String> {
    input
        .next_line()
        .await?
        .ok_or_else(|| anyhow!(ChatError::connection_closed("standard input closed")))
}

async fn run_client(host: &str, args: &[String]) -> anyhow::Result<()> {
    let port = parse_option(args, "--port")?.unwrap_or(DEFAULT_PORT);
    let addr = resolve(host, port)?;

    let mut client = ChatClient::connect(addr).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    client.await_proceed().await?;

    println!("{}", client.read_prompt().await?);
    let name = prompt_reply(&mut input).await?;
    client.answer(&name).await?;

    println!("{}", client.read_prompt().await?);
    loop {
        let color = prompt_reply(&mut input).await?;
        client.answer(&color).await?;
        if client.read_marker().await? {
            break;
        }
        println!("{}", client.read_prompt().await?);
    }
    client.acknowledge().await?;
    println!("{}", client.await_joined().await?);

    loop {
        tokio::select! {
            line = input.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => client.send_line(&line).await?,
                None => break,
            },
            incoming = client.next_line() => match incoming? {
                Some(message) => {
                    stdout.write_all(&message).await?;
                    stdout.flush().await?;
                }
                None => {
                    println!("Server closed the connection.");
                    return Ok(());
                }
            },
        }
    }

    client.disconnect().await?;
    Ok(())
}
