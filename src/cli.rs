use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Step Maker - record operator input to a running VM as a step file
#[derive(Parser)]
#[command(name = "stepmaker")]
#[command(about = "Record keyboard and mouse steps against a running VM")]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive recording session
    Record {
        /// Step file to create (must not exist)
        #[arg(short, long)]
        steps: PathBuf,

        /// Control helper program invoked as `<helper> [helper args...] <verb> [args...]`
        #[arg(long, required_unless_present = "dry_run")]
        helper: Option<PathBuf>,

        /// Argument passed to the helper before the verb (repeatable)
        #[arg(long = "helper-arg", value_name = "ARG", requires = "helper")]
        helper_args: Vec<String>,

        /// Use a VM stand-in that only logs commands
        #[arg(long, conflicts_with = "helper")]
        dry_run: bool,

        /// JSON file with default variable values
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Default variable value, overriding the params file
        #[arg(long = "param", value_name = "NAME=VALUE")]
        param: Vec<String>,

        /// Recorder configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for the capture artifact (default: system temp dir)
        #[arg(long)]
        tempdir: Option<PathBuf>,

        /// Directory for the vars file (default: <steps dir>/../steps_data/<name>_data)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Check the action lines of an existing step file
    Check {
        /// Step file to check
        steps: PathBuf,
    },
    /// Validate a recorder configuration file
    ValidateConfig {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
