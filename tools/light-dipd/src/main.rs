mod clock;
mod config;
mod daemon;
mod display;
mod host;
mod hw;
mod sampler;
mod services;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Config, DEFAULT_CONFIG_PATH};
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// light-dipd - LED blink controller and light-dip detector for the BeagleY-AI board.
///
/// Without a subcommand the daemon runs in the foreground.
#[derive(Parser, Debug)]
#[command(name = "light-dipd", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML settings; a missing file means built-in defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override `[net] telemetry_target`.
    #[arg(long)]
    telemetry: Option<SocketAddr>,
    /// Override `[net] command_bind`.
    #[arg(long)]
    command_bind: Option<SocketAddr>,
    /// Override `[pwm] path`.
    #[arg(long)]
    pwm: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the board daemon in the foreground (same as no subcommand).
    Run(RunArgs),
    /// Print status frames sent by a running daemon.
    Monitor {
        #[arg(long, default_value = "0.0.0.0:12346")]
        bind: SocketAddr,
        /// One JSON object per frame instead of the console layout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Send one text command (help, count, length, dips, history, stop).
    Send {
        /// Empty string repeats the previous command.
        command: String,
        #[arg(long, default_value = "192.168.7.2:12345")]
        target: SocketAddr,
        /// Stop waiting once no reply arrived for this long, e.g. 500ms/2s.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "500ms")]
        timeout: Duration,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.cmd {
        None => daemon::run(&load_config(&cli.run)?),
        Some(Cmd::Run(args)) => daemon::run(&load_config(&args)?),
        Some(Cmd::Monitor { bind, json }) => host_runtime()?.block_on(host::monitor(bind, json)),
        Some(Cmd::Send {
            command,
            target,
            timeout,
        }) => {
            let replies = host_runtime()?.block_on(host::send(target, &command, timeout))?;
            if replies.is_empty() {
                eprintln!(
                    "no reply from {target} within {}",
                    humantime::format_duration(timeout)
                );
            }
            for reply in replies {
                print!("{reply}");
            }
            Ok(())
        }
    }
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut cfg = Config::load(&args.config)?;
    if let Some(target) = args.telemetry {
        cfg.net.telemetry_target = target;
    }
    if let Some(bind) = args.command_bind {
        cfg.net.command_bind = bind;
    }
    if let Some(path) = &args.pwm {
        cfg.pwm.path = path.clone();
    }
    Ok(cfg)
}

fn host_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
}

/// Log to stderr so the status lines on stdout stay clean. `RUST_LOG`
/// overrides the default `info` filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
