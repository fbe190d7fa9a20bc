//! EmberKV - An In-Memory Typed Data Engine
//!
//! This is the console entry point. It opens the engine (recovering any
//! persisted state), starts the background tasks and then executes commands
//! read line by line from stdin.

use anyhow::{bail, Context};
use bytes::Bytes;
use emberkv::{Engine, EngineConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Console options
#[derive(Debug, Default)]
struct Options {
    /// JSON configuration file
    config: Option<PathBuf>,
    /// Data directory; enables persistence
    dir: Option<PathBuf>,
}

impl Options {
    /// Parse options from command-line arguments
    fn from_args() -> Self {
        let mut options = Options::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    if i + 1 < args.len() {
                        options.config = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    } else {
                        eprintln!("Error: --config requires a value");
                        std::process::exit(1);
                    }
                }
                "--dir" | "-d" => {
                    if i + 1 < args.len() {
                        options.dir = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    } else {
                        eprintln!("Error: --dir requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        options
    }

    fn load_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(dir) = &self.dir {
            config.persistence.enabled = true;
            config.persistence.dir = dir.clone();
        }
        Ok(config)
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - An In-Memory Typed Data Engine

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -c, --config <PATH>  JSON configuration file (created with defaults if missing)
    -d, --dir <PATH>     Data directory; enables the WAL and snapshots
    -v, --version        Print version information
    -h, --help           Print this help message

CONSOLE:
    Commands are read from stdin, one per line. Double quotes group a token.
    > SET greeting "hello world"
    OK
    > GET greeting
    "hello world"
    SAVE writes a snapshot, QUIT exits.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::from_args();
    let config = options.load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::open(config).context("failed to open engine")?;
    if let Some(report) = engine.recovery() {
        info!(
            snapshot_keys = report.snapshot_keys,
            replayed = report.replayed_records,
            "Recovered persisted state"
        );
    }
    engine.start_background_tasks();

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = console_loop(&engine) => result?,
        _ = shutdown => {}
    }

    engine.shutdown().context("failed to shut down cleanly")?;
    Ok(())
}

/// Reads commands from stdin until EOF or `QUIT`.
async fn console_loop(engine: &Engine) -> anyhow::Result<()> {
    let conn = engine.connect();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let tokens = match tokenize(&line) {
            Ok(tokens) => tokens,
            Err(e) => {
                println!("(error) ERR {e}");
                continue;
            }
        };
        let Some((name, args)) = tokens.split_first() else {
            continue;
        };

        match name.to_ascii_uppercase().as_str() {
            "QUIT" | "EXIT" => break,
            "SAVE" => match engine.snapshot() {
                Ok(Some(info)) => println!("OK ({} keys, {} bytes)", info.keys, info.bytes),
                Ok(None) => println!("(error) ERR persistence is disabled"),
                Err(e) => println!("(error) {e}"),
            },
            _ => {
                let args: Vec<Bytes> = args.iter().map(|a| Bytes::from(a.clone())).collect();
                match engine.execute(conn, name, &args) {
                    Ok(reply) => println!("{reply}"),
                    Err(e) => {
                        if e.is_storage() {
                            warn!(error = %e, "Storage failure while executing command");
                        }
                        println!("(error) {e}");
                    }
                }
            }
        }
    }

    engine.disconnect(conn);
    Ok(())
}

/// Splits a console line into tokens.
///
/// Whitespace separates tokens; double quotes group one, with `\"`, `\\`
/// and `\n` escapes inside them.
fn tokenize(line: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => token.push('\n'),
                        Some(other) => token.push(other),
                        None => break,
                    },
                    c => token.push(c),
                }
            }
            if !closed {
                bail!("unbalanced quotes");
            }
            if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                bail!("closing quote must be followed by a space");
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}
