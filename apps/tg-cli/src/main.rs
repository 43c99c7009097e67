//! # tempground
//!
//! Smoke test for a published Kotlin library: generates a minimal Gradle
//! project that depends on the library, runs it in a throwaway workspace,
//! and checks the program's output.
//!
//! - `tempground check`: build and run the project, verify exit code and
//!   stdout (the default when no subcommand is given)
//! - `tempground render`: print the generated files only

mod commands;
mod config;
mod project;
mod template;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::SmokeConfig;

/// Check that a published library can be declared, imported, and used from
/// a fresh project.
#[derive(Parser)]
#[command(name = "tempground", version, about)]
struct Cli {
    /// Config file; built-in defaults are used when it doesn't exist.
    #[arg(long, global = true, default_value = "tempground.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run the generated project and verify its output.
    Check {
        /// Library branch to build from ("" for no constraint).
        #[arg(long)]
        branch: Option<String>,
        /// Kill the build after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the generated project files without running anything.
    Render {
        /// Library branch to build from ("" for no constraint).
        #[arg(long)]
        branch: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interfere with checked output on stdout.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("tg_workspace={level},tempground={level}"))
    })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut config = SmokeConfig::load_or_default(&cli.config)?;

    match cli.command.unwrap_or(Commands::Check {
        branch: None,
        timeout: None,
        json: false,
    }) {
        Commands::Check {
            branch,
            timeout,
            json,
        } => {
            if let Some(branch) = branch {
                config.library.branch = branch;
            }
            if timeout.is_some() {
                config.check.timeout_secs = timeout;
            }
            commands::check::execute(&config, json)
        }
        Commands::Render { branch } => {
            if let Some(branch) = branch {
                config.library.branch = branch;
            }
            commands::render::execute(&config)
        }
    }
}
