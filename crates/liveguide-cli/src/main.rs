use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liveguide_core::{guidance, FaceError, LivenessStep};
use liveguide_runtime::RuntimeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod manifest;
mod replay;

#[derive(Parser)]
#[command(name = "liveguide", version, about = "Guided liveness capture tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a recorded frame script through a liveness session
    Replay {
        /// Frame script (JSON Lines, one observation per line)
        #[arg(long)]
        script: PathBuf,
        /// Directory for capture artifacts and the manifest
        #[arg(long)]
        out: PathBuf,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pace frames by timestamp and drop frames while busy
        #[arg(long)]
        realtime: bool,
        /// Suppress guidance output
        #[arg(long, short)]
        quiet: bool,
    },
    /// Verify capture artifacts against a manifest
    Verify {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Print the guidance text table
    Guidance,
    /// Print the effective configuration as JSON
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            out,
            config,
            realtime,
            quiet,
        } => {
            let manifest_path = replay::run(replay::ReplayOptions {
                script,
                out_dir: out,
                config,
                realtime,
                quiet,
            })
            .await?;
            println!("Liveness complete. Manifest: {}", manifest_path.display());
        }
        Command::Verify {
            manifest: manifest_path,
        } => {
            let loaded = manifest::Manifest::load(&manifest_path)?;
            loaded
                .verify()
                .with_context(|| format!("verifying {}", manifest_path.display()))?;
            println!(
                "OK: {} artifacts verified (session {})",
                loaded.entries.len(),
                loaded.session_id
            );
        }
        Command::Guidance => print_guidance(),
        Command::Config { config } => {
            let cfg = RuntimeConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn print_guidance() {
    let errors = [
        FaceError::NotCentered,
        FaceError::TooFar,
        FaceError::TooClose,
        FaceError::MultipleFaces,
        FaceError::NoFace,
    ];
    for step in LivenessStep::CAPTURE_STEPS {
        println!("{step}: {}", guidance(step, FaceError::None).prompt);
        for error in errors {
            println!("  {:<16} {}", error.as_str(), guidance(step, error).error);
        }
    }
}
