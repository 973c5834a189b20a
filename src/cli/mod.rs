//! CLI module - Command line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Hallmark - identify binary file formats by byte-pattern signature
///
/// Runs a PRONOM-style signature database over files or directory trees
/// and reports every matching format. All operations are READ-ONLY.
#[derive(Parser, Debug)]
#[command(name = "hallmark")]
#[command(version)]
#[command(about = "Identify binary file formats by byte-pattern signature", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Output format for machine parsing
    #[arg(long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Identify a file or directory tree against a signature database
    Identify(IdentifyArgs),

    /// Compile a signature expression and show its search plan
    Compile(CompileArgs),

    /// Create or show the default configuration
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct IdentifyArgs {
    /// File or directory to identify
    #[arg(required = true)]
    pub source: PathBuf,

    /// Signature database (JSON); defaults to the configured path
    #[arg(long, short)]
    pub signatures: Option<PathBuf>,

    /// Max bytes to scan from each end of every file (0 = unlimited)
    #[arg(long, short)]
    pub max_bytes: Option<i64>,

    /// Number of parallel workers (default: CPU count)
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Do not recurse into directories
    #[arg(long)]
    pub no_recurse: bool,

    /// Disable extension fallback for unmatched files
    #[arg(long)]
    pub no_extension_fallback: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct CompileArgs {
    /// Signature expression, e.g. "4D5A{2-4}(41|42)*504B"
    #[arg(required = true)]
    pub expression: String,

    /// Anchoring reference for the expression
    #[arg(long, short, value_enum, default_value = "bof")]
    pub anchor: AnchorArg,
}

#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Write a default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print the config file path
    #[arg(long)]
    pub path: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AnchorArg {
    /// Anchored to beginning of file
    Bof,
    /// Anchored to end of file
    Eof,
    /// May start anywhere
    Variable,
}
