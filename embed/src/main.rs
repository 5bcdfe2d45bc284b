use anyhow::Result;
use clap::Parser;
use embed_host::{execute, Config, OutputMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// The one snippet this host runs.
const DEMO_SCRIPT: &str = "print(1/978)";

#[derive(Parser)]
#[command(version, about = "Run an embedded Lua snippet in a restricted interpreter")]
struct Cli {
    /// Config file (default: ~/.config/lua-embed/config.lua)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Collect script output and print it after the run
    #[arg(long)]
    capture: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load_default()?,
    };
    if cli.capture {
        cfg.output = OutputMode::Capture;
    }
    if let Some(log) = cli.log {
        cfg.log = log;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log)),
        )
        .with_writer(std::io::stderr)
        .init();

    // script failures are already logged; the process still exits normally
    let report = execute(&cfg, DEMO_SCRIPT.as_bytes());
    if cfg.output == OutputMode::Capture {
        print!("{}", report.output);
    }
    Ok(())
}
