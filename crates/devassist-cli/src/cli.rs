use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use devassist_core::{ModelTier, ProviderKind, TaskType};

/// Command-line interface for the `DevAssist` LLM orchestrator
#[derive(Debug, Parser)]
#[command(name = "devassist")]
#[command(about = "Multi-provider LLM orchestration for proposal analysis", long_about = None)]
pub struct Cli {
    /// Configuration file [default: ~/.devassist/config.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate text and print the result
    Generate {
        /// Request parameters
        #[command(flatten)]
        request: RequestArgs,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream generated text as it arrives
    Stream {
        /// Request parameters
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Check every configured provider
    Health {
        /// Print statuses as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recorded usage and spend
    Usage {
        /// Number of days to cover, ending today
        #[arg(short, long, default_value_t = 1)]
        days: u32,

        /// Only this user's requests
        #[arg(long)]
        user: Option<String>,

        /// Only this organization's requests
        #[arg(long)]
        org: Option<String>,

        /// Only this provider's requests
        #[arg(long)]
        provider: Option<ProviderKind>,
    },

    /// List prompt templates or show one
    Templates {
        /// Only templates for this task type
        #[arg(short, long)]
        task: Option<TaskType>,

        /// Print the named template in full (requires --task)
        #[arg(long, requires = "task")]
        show: Option<String>,
    },
}

/// Parameters shared by `generate` and `stream`
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// Task type, e.g. text-analysis or data_extraction
    pub task: TaskType,

    /// Content to process; read from --file or stdin when omitted
    pub content: Option<String>,

    /// Read content from a file
    #[arg(short, long, conflicts_with = "content")]
    pub file: Option<PathBuf>,

    /// Use this model instead of task-based selection
    #[arg(short, long)]
    pub model: Option<String>,

    /// Selection tier: default, fast or quality
    #[arg(long)]
    pub tier: Option<ModelTier>,

    /// System prompt override
    #[arg(long)]
    pub system: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Completion token cap
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Attribute the request to a user
    #[arg(long)]
    pub user: Option<String>,

    /// Attribute the request to an organization
    #[arg(long)]
    pub org: Option<String>,
}
