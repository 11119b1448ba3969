use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Srt,
    Timestamped,
}

#[derive(Parser)]
#[command(
    name = "ytenhance",
    about = "YouTube transcript extractor with AI cleanup",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Show extraction tier, metadata and chunking details on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the transcript of a video
    Transcript {
        /// YouTube video URL or video ID (reads from stdin if omitted)
        url: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write output to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print title, channel, duration and description
    Metadata {
        /// YouTube video URL or video ID (reads from stdin if omitted)
        url: Option<String>,
    },

    /// Clean up the transcript with an LLM provider
    Enhance {
        /// YouTube video URL or video ID (reads from stdin if omitted)
        url: Option<String>,

        /// Provider name from the config (defaults to default_provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model override for this run
        #[arg(short, long)]
        model: Option<String>,

        /// Write output to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List models offered by a provider
    Models {
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Validate a provider's config and check it can be reached
    TestProvider {
        #[arg(short, long)]
        provider: Option<String>,
    },
}
