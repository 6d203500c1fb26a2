//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// sopsfile - Declarative sops-encrypted files
#[derive(Parser, Debug)]
#[command(name = "sopsfile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to sopsfile.yaml manifest
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encrypt every declared file that is missing or out of date
    Apply(ApplyArgs),

    /// Show what apply would change
    Plan(PlanArgs),

    /// Remove every encrypted file recorded in state
    Destroy(DestroyArgs),

    /// Show recorded resources and whether their files are intact
    Status(StatusArgs),

    /// Validate the manifest and resolve every resource's keys
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Only apply the named resources
    #[arg(short, long = "target", value_name = "RESOURCE")]
    pub targets: Vec<String>,

    /// Re-encrypt even when nothing changed
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Only plan the named resources
    #[arg(short, long = "target", value_name = "RESOURCE")]
    pub targets: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Only destroy the named resources
    #[arg(short, long = "target", value_name = "RESOURCE")]
    pub targets: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Skip resolving master keys
    #[arg(long)]
    pub skip_keys: bool,
}
