//! warmstart demo - restart an application in place, keep its connection

mod app;
mod gateway;

use anyhow::{Context, Result};
use app::DemoApp;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use warmstart_core::{Config, ConfigOverrides};
use warmstart_restart::{FnEntryPoint, LaunchContext, RestartSession, Restarter, finish};

/// warmstart demo - live restarts with a kept gateway connection
#[derive(Parser, Debug)]
#[command(name = "warmstart-demo")]
#[command(about = "Restart an application in place when its sources change")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory to watch (repeatable; replaces configured roots)
    #[arg(long = "watch", value_name = "DIR")]
    watch: Vec<PathBuf>,

    /// Quiet period before restarting ("500ms", "2s")
    #[arg(long, value_name = "DURATION")]
    restart_delay: Option<String>,

    /// Session key for the gateway connection (no key: never reused)
    #[arg(long, value_name = "KEY")]
    cache_key: Option<String>,

    /// Only restart on explicit `restart` commands
    #[arg(long)]
    no_watch: bool,

    /// Seconds between simulated heartbeats
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    heartbeat: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        warmstart_core::logging::init_with_level(tracing::Level::DEBUG);
    } else {
        warmstart_core::logging::init();
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => return finish(Err(e)),
    };
    info!("warmstart demo starting");

    let app = Arc::new(DemoApp::new(config, Duration::from_secs(args.heartbeat.max(1))));
    let restarter = Restarter::new();
    let result = restarter.initialize(
        std::env::args(),
        FnEntryPoint::new("warmstart-demo", move |ctx: LaunchContext| app.launch(ctx)),
    );

    if let Some(session) = restarter.session() {
        if let Err(e) = spawn_console(session) {
            warn!("Console unavailable, stop with Ctrl-C: {e:#}");
        }
    }
    finish(result)
}

fn load_config(args: &Args) -> Result<Config> {
    let home_dir =
        warmstart_core::home::get_home_dir().context("Failed to determine home directory")?;
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let overrides = ConfigOverrides {
        restart_delay: args.restart_delay.clone(),
        watch_roots: args.watch.clone(),
        cache_key: args.cache_key.clone(),
        disable_restart: args.no_watch,
        config_path: args.config.clone(),
    };
    let config = warmstart_core::config::resolve_config(&overrides, &current_dir, &home_dir)
        .context("Failed to resolve configuration")?;

    match &args.config {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => info!("Using resolved configuration"),
    }
    Ok(config)
}

/// Read `restart` and `exit` commands from stdin.
///
/// End of input requests exit.
fn spawn_console(session: RestartSession) -> Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to read stdin: {e}");
                        break;
                    }
                };
                match line.trim() {
                    "" => {}
                    "restart" => {
                        if let Err(e) = session.restart() {
                            error!("Restart failed: {e}");
                        }
                    }
                    "exit" | "quit" => break,
                    other => warn!("Unknown command '{other}' (try 'restart' or 'exit')"),
                }
            }
            session.request_exit();
        })
        .context("Failed to spawn console thread")?;
    Ok(())
}
