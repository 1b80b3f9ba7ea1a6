//! Offline firmware kitchen: apply a patch recipe to a flash dump.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kitchen", version, about = "Apply typed patches to a firmware dump")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify and apply the patches described by a patch file.
    Patch {
        /// JSON patch file; the firmware path inside it is resolved
        /// relative to this file.
        patch_file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Patch { patch_file } => {
            let output = displayflash::kitchen::run(&patch_file)
                .with_context(|| format!("applying {}", patch_file.display()))?;
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}
