//! AreYouOK server: headless daemon over a persistent switch registry
//!
//! Keeps the registry in SQLite and periodically reports new journal events
//! and how close every funded switch is to its deadline.
//!
//! # Usage
//!
//! ```bash
//! areyouok-server --config /path/to/areyouok-server.toml
//! areyouok-server --check    # Run one check cycle and exit
//! areyouok-server --validate # Validate config and exit
//! ```

mod config;
mod daemon;
mod db;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "/config/areyouok-server.toml";

/// What the command line asked for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Version,
    Validate(PathBuf),
    CheckOnce(PathBuf),
    Daemon(PathBuf),
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut one_shot = false;
    let mut validate_only = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path argument"))?;
                config_path = PathBuf::from(path);
            }
            "--check" | "--once" => one_shot = true,
            "--validate" => validate_only = true,
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(if validate_only {
        Command::Validate(config_path)
    } else if one_shot {
        Command::CheckOnce(config_path)
    } else {
        Command::Daemon(config_path)
    })
}

/// Load, override from the environment, and validate.
fn load_config(path: &Path) -> Result<config::ServerConfig> {
    let mut cfg = config::ServerConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    cfg.apply_env_overrides();
    cfg.validate().context("Configuration validation failed")?;
    Ok(cfg)
}

fn main() -> Result<()> {
    let (path, one_shot) = match parse_args(std::env::args().skip(1))? {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("areyouok-server {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Validate(path) => {
            let cfg = load_config(&path)?;
            println!("Configuration is valid: {}", path.display());
            println!("  data dir        {}", cfg.server.data_dir.display());
            println!("  database        {}", cfg.db_path().display());
            println!("  cycle every     {}s", cfg.server.check_interval_secs);
            println!(
                "  warn / critical {:.2} / {:.2}",
                cfg.heartbeat.checkin_threshold, cfg.heartbeat.critical_threshold
            );
            return Ok(());
        }
        Command::CheckOnce(path) => (path, true),
        Command::Daemon(path) => (path, false),
    };

    let cfg = load_config(&path)?;
    env_logger::Builder::new()
        .parse_filters(&cfg.server.log_level)
        .init();

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    if one_shot {
        let cursor = rt.block_on(daemon::run_check_cycle(&cfg, 0))?;
        log::info!("Single cycle done, journal at #{}", cursor);
        return Ok(());
    }

    let outcome = rt.block_on(async {
        tokio::select! {
            result = daemon::run(cfg) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutdown requested");
                Ok(())
            }
        }
    });
    if let Err(e) = outcome {
        log::error!("Server error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"areyouok-server: monitor a persistent dead-man's switch registry

USAGE:
    areyouok-server [--config <PATH>] [--check | --validate]

OPTIONS:
    -c, --config <PATH>   Config file (default: {DEFAULT_CONFIG_PATH})
    --check, --once       Run one check cycle and exit
    --validate            Validate the config and exit
    -h, --help            Show this help
    -V, --version         Show version

ENVIRONMENT (overrides the config file):
    AREYOUOK_DATA_DIR         Directory holding areyouok.db
    AREYOUOK_CHECK_INTERVAL   Seconds between check cycles
    AREYOUOK_LOG_LEVEL        env_logger filter, e.g. info or areyouok_server=debug
"#
    );
}
