use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use skiff_launcher::{update_before_launch, Launcher};
use skiff_updater::UpdaterConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skiff-launcher")]
#[command(about = "Start the current skiff release and relaunch it after updates")]
struct Args {
    /// Installation root
    #[arg(short, long, env = "SKIFF_ROOT", default_value = ".")]
    root: PathBuf,

    /// Run one scheduled update cycle before starting
    #[arg(long)]
    update_first: bool,

    /// Restart requests tolerated without a version change
    #[arg(long, default_value_t = 5)]
    max_restarts: u32,

    /// Log level (overrides logging.level from skiff.toml)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Arguments passed to the release
    #[arg(last = true)]
    args: Vec<OsString>,
}

fn main() -> anyhow::Result<std::process::ExitCode> {
    let args = Args::parse();

    let config = UpdaterConfig::load_from_root(&args.root)
        .with_context(|| format!("loading configuration from {}", args.root.display()))?;
    let level = args.log_level.unwrap_or(config.logging.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(format!("skiff_launcher={level},skiff_updater={level}"))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.update_first {
        match update_before_launch(&args.root) {
            Ok(outcome) => info!(?outcome, "pre-launch update cycle finished"),
            Err(e) => warn!(error = %e, "pre-launch update cycle failed"),
        }
    }

    let code = Launcher::new(&args.root)
        .args(args.args)
        .max_restarts(args.max_restarts)
        .run()
        .context("running release")?;

    Ok(std::process::ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
