//! Stencil: render configuration files from templates, values and the
//! environment.
//!
//! # Usage
//!
//! ```text
//! stencil render [-i <glob>...] [-o <path>] [-r <glob>...] [-v <glob>...] [-f <dir>...]
//!                [-s | --missing-key error|zero|lenient] [--dry-run] [--max-concurrency <n>]
//! stencil ensure <VAR>... [-a]
//! stencil path <PATH>... [-r] [-w] [-x] [-t <duration>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use commands::{ensure::EnsureArgs, path::PathArgs, render::RenderArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stencil",
    version,
    about = "Render configuration files from templates, values files and environment variables",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render templates against values files, a file bundle and the environment.
    Render(RenderArgs),

    /// Check that environment variables are set and non-empty.
    Ensure(EnsureArgs),

    /// Wait until paths exist with the requested permissions.
    Path(PathArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => args.run(),
        Commands::Ensure(args) => args.run(),
        Commands::Path(args) => args.run(),
    }
}

/// Logs go to stderr; stdout carries rendered output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
