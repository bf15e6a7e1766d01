//! CLI command definitions and argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::keys::KeyMaterial;
use crate::{publish, ExitCode};

/// skiff publisher - produce signed, sealed releases
#[derive(Parser, Debug)]
#[command(name = "skiff-publisher")]
#[command(version, about = "Produce signed, sealed releases for skiff clients")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate signing and encryption keys
    Keygen(KeygenArgs),
    /// Bundle, seal and sign a release directory
    Publish(PublishArgs),
    /// Check a distribution root with the publisher's keys
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Directory to write the key files into
    #[arg(long)]
    pub out: PathBuf,

    /// Overwrite existing key files
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Release tree to publish
    #[arg(long)]
    pub release_dir: PathBuf,

    /// Version string (opaque; clients compare it for equality only)
    #[arg(long = "version")]
    pub release_version: String,

    /// Key directory created by `keygen`
    #[arg(long, env = "SKIFF_KEYS")]
    pub keys: PathBuf,

    /// Distribution root to write into
    #[arg(long)]
    pub dist: PathBuf,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Distribution root to check
    #[arg(long)]
    pub dist: PathBuf,

    /// Key directory created by `keygen`
    #[arg(long, env = "SKIFF_KEYS")]
    pub keys: PathBuf,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Commands::Keygen(args) => {
                let keys = KeyMaterial::generate().context("generating keys")?;
                keys.save(&args.out, args.force)
                    .with_context(|| format!("writing keys to {}", args.out.display()))?;
                println!("Keys written to {}", args.out.display());
                println!("Share encryption_key.bin with clients out of band; keep private_key.pem secret.");
                Ok(ExitCode::Success)
            }
            Commands::Publish(args) => {
                let keys = KeyMaterial::load(&args.keys)
                    .with_context(|| format!("loading keys from {}", args.keys.display()))?;
                let report = publish::publish(&args.release_dir, &args.release_version, &keys, &args.dist)
                    .with_context(|| format!("publishing {}", args.release_version))?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!(
                        "Published {} ({} files, {} bytes, sha256 {})",
                        report.version,
                        report.files.len(),
                        report.artifact_bytes,
                        report.artifact_sha256
                    );
                }
                Ok(ExitCode::Success)
            }
            Commands::Verify(args) => {
                let keys = KeyMaterial::load(&args.keys)
                    .with_context(|| format!("loading keys from {}", args.keys.display()))?;
                match publish::verify_distribution(&args.dist, &keys) {
                    Ok(report) => {
                        if self.json {
                            println!("{}", serde_json::to_string_pretty(&report)?);
                        } else {
                            println!("{} verified, {} files:", report.version, report.files.len());
                            for file in &report.files {
                                println!("  {file}");
                            }
                        }
                        Ok(ExitCode::Success)
                    }
                    Err(e) => {
                        eprintln!("Verification failed: {e}");
                        Ok(ExitCode::VerificationFailed)
                    }
                }
            }
        }
    }
}
