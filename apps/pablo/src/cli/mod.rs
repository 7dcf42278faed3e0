//! # Pablo CLI Module
//!
//! This module implements the CLI interface for Pablo.
//!
//! ## Available Commands
//!
//! - `build` - Analyze a token unit and write a `.pgraph` block
//! - `decode` - Summarize (or dump) a `.pgraph` block
//! - `justify` - Print the provenance chain of one edge
//! - `rules` - Load and validate a rule directory
//! - `vocab` - Intern, look up or resolve vocabulary entries
//! - `retain` - Store thumbnails and fact blocks
//! - `query` - Nearest stored graphs to a graph's thumbnail
//! - `status` - Vocabulary, rule library and store counters

mod commands;

use clap::{Parser, Subcommand};
use pablo_core::{PabloConfig, PabloError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Pablo - deterministic linguistic graph core
///
/// Builds typed graphs from tagged token units, refines them with
/// phase-ordered rules, and encodes, justifies and retrieves them.
#[derive(Parser, Debug)]
#[command(name = "pablo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML). A missing file means defaults.
    #[arg(short = 'c', long, global = true, default_value = "pablo.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a token unit, run all phases, thumbnail and encode
    Build {
        /// Token unit (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output .pgraph file
        #[arg(short, long)]
        output: PathBuf,

        /// zstd-compress the block body
        #[arg(long)]
        compress: bool,
    },

    /// Summarize a .pgraph block (full graphs in JSON mode)
    Decode {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the provenance chain of an edge
    Justify {
        #[arg(short, long)]
        input: PathBuf,

        /// Edge id
        #[arg(short, long)]
        edge: u32,

        /// Start the chain at this rule's first firing
        #[arg(short, long)]
        rule: Option<u32>,
    },

    /// Load and validate rule files; print the execution order
    Rules {
        /// Rule directory (defaults to paths.rules_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Operate on the vocabulary directory
    Vocab {
        #[command(subcommand)]
        action: VocabAction,
    },

    /// Store thumbnails and fact blocks for every graph in a block
    Retain {
        #[arg(short, long)]
        input: PathBuf,

        /// Store the thumbnail only
        #[arg(long)]
        thumbnail_only: bool,
    },

    /// Nearest stored graphs to a graph's thumbnail
    Query {
        #[arg(short, long)]
        input: PathBuf,

        /// Number of hits
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Show vocabulary, rule library and store status
    Status,
}

/// `pablo vocab` actions.
#[derive(Subcommand, Debug)]
pub enum VocabAction {
    /// Intern entries, printing their ids
    Intern { entries: Vec<String> },
    /// Id of an existing entry
    Lookup { entry: String },
    /// Entry behind an id
    Resolve { id: u32 },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), PabloError> {
    let config = PabloConfig::load(&cli.config)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Build {
            input,
            output,
            compress,
        }) => cmd_build(&config, json_mode, &input, &output, compress),
        Some(Commands::Decode { input }) => cmd_decode(json_mode, &input),
        Some(Commands::Justify { input, edge, rule }) => {
            cmd_justify(&config, json_mode, &input, edge, rule)
        }
        Some(Commands::Rules { dir }) => cmd_rules(&config, json_mode, dir.as_deref()),
        Some(Commands::Vocab { action }) => cmd_vocab(&config, json_mode, &action),
        Some(Commands::Retain {
            input,
            thumbnail_only,
        }) => cmd_retain(&config, json_mode, &input, !thumbnail_only),
        Some(Commands::Query { input, k }) => cmd_query(&config, json_mode, &input, k),
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}
