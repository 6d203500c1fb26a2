//! sopsfile CLI - Declarative sops-encrypted files
//!
//! This is the main entry point for the sopsfile command-line interface.

mod cli;
mod commands;
mod output;
mod state;

use anyhow::Result;
use clap::Parser;
use sopsfile_provider::{codes, EncryptError, ResourceError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    // Parse CLI args
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.quiet);

    if let Err(err) = run(cli).await {
        output::error(&format!("{:#}", err));
        if let Some(message) = user_error(&err) {
            eprintln!("\n{}", message);
        }
        std::process::exit(exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let manifest = cli.config.as_deref();
    match cli.command {
        Commands::Apply(args) => commands::apply::run(args, manifest).await,
        Commands::Plan(args) => commands::plan::run(args, manifest).await,
        Commands::Destroy(args) => commands::destroy::run(args, manifest).await,
        Commands::Status(args) => commands::status::run(args, manifest).await,
        Commands::Validate(args) => commands::validate::run(args, manifest),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn encrypt_error(err: &anyhow::Error) -> Option<&EncryptError> {
    err.chain().find_map(|cause| {
        cause.downcast_ref::<EncryptError>().or_else(|| {
            match cause.downcast_ref::<ResourceError>() {
                Some(ResourceError::Encrypt(e)) => Some(e),
                _ => None,
            }
        })
    })
}

/// Exit code for the first typed error in the chain
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = encrypt_error(err) {
        return e.exit_code();
    }
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<ResourceError>()
                .map(ResourceError::exit_code)
                .or_else(|| {
                    cause
                        .downcast_ref::<sopsfile_core::Error>()
                        .map(|_| codes::ERROR_READING_CONFIG)
                })
        })
        .unwrap_or(codes::ERROR_GENERIC)
}

fn user_error(err: &anyhow::Error) -> Option<String> {
    encrypt_error(err).and_then(EncryptError::user_error)
}
