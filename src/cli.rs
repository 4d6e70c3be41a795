//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Autonomous multi-agent code-building swarm
#[derive(Debug, Parser)]
#[command(name = "swarm", version, about)]
pub struct Cli {
    /// Path to a configuration file (default: .codeswarm.yml fallback chain)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root directory
    #[arg(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a project from a task description
    Build {
        /// What to build
        task: String,
    },

    /// Resume an interrupted build from its checkpoint
    Resume,

    /// Continue a finished build with a change request
    Continue {
        /// The requested changes
        changes: String,
    },
}
