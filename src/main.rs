use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fluux_coder::repl::{self, ReplInput};
use fluux_coder::{CommandKind, Config, Sandbox, Session};

const DEFAULT_CONFIG_PATH: &str = "config/coder.toml";

fn print_help() {
    println!(
        "\
fluux-coder v{}

A sandboxed, stateful terminal session for AI agents.

USAGE:
    fluux-coder [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, fluux_coder=debug,warn)
    FLUUX_CODER_CONFIG    Config path used when CONFIG_PATH is not given

EXAMPLES:
    fluux-coder                            # uses {DEFAULT_CONFIG_PATH}
    fluux-coder /etc/fluux/coder.toml      # custom config path
    RUST_LOG=debug fluux-coder             # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("fluux-coder v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Logs go to stderr so they never interleave with the JSON on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fluux_coder=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLUUX_CODER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = if Path::new(&config_path).exists() {
        info!("Loading configuration from {config_path}");
        Config::load(&config_path)?
    } else {
        warn!("Config file not found at {config_path}, using defaults (empty allowlist)");
        Config::default()
    };

    let sandbox = Arc::new(Sandbox::new(&config.sandbox)?);
    if sandbox.allowlist().is_empty() {
        warn!("Allowlist is empty: `run` will refuse every program");
    } else {
        info!(
            "Allowed commands: {}",
            sandbox.allowlist().iter().collect::<Vec<_>>().join(", ")
        );
    }
    let session = Session::new(sandbox);

    println!("--- Fluux Coder interactive session ---");
    println!("Type 'help' for a list of commands, or 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let prompt = repl::prompt(session.sandbox(), &session.snapshot().await);
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted by user. Exiting.");
                return Ok(());
            }
        };
        let Some(line) = line else {
            println!("\nExiting.");
            return Ok(());
        };

        match repl::parse_line(&line) {
            Ok(ReplInput::Empty) => {}
            Ok(ReplInput::Exit) => {
                println!("Exiting.");
                return Ok(());
            }
            Ok(ReplInput::Help) => {
                print!("{}", CommandKind::help_text());
                println!("  {:<28} {}", "exit", "End the session");
            }
            Ok(ReplInput::Command(request)) => {
                let result = session.execute_request(request).await;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Err(e) => {
                println!("Cannot parse input: {e}");
            }
        }
    }
}
