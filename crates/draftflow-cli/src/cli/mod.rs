//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use draftflow_core::{config, telemetry};

mod commands;

#[derive(Parser)]
#[command(name = "draftflow")]
#[command(version)]
#[command(about = "Streaming writing assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Ask the backend for a writing plan
    Analyze {
        /// Article topic or request
        #[arg(short, long)]
        topic: String,

        /// Reference file to upload first
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Print the plan as JSON (usable with `generate --plan`)
        #[arg(long)]
        json: bool,
    },

    /// Stream a full article to stdout
    #[command(group(ArgGroup::new("source").args(["prompt", "prompt_file", "plan"]).required(true).multiple(true)))]
    Generate {
        /// System prompt
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the system prompt from a file
        #[arg(long, value_name = "PATH")]
        prompt_file: Option<PathBuf>,

        /// User instructions sent with the prompt
        #[arg(short, long)]
        instructions: Option<String>,

        /// Plan JSON from `analyze --json`; supplies options and the default prompt
        #[arg(long, value_name = "PATH")]
        plan: Option<PathBuf>,

        /// Writing option as id=value (repeatable)
        #[arg(short = 'o', long = "option", value_name = "ID=VALUE")]
        options: Vec<String>,

        /// Also write the final text to this file
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Request a document export once the content id arrives
        #[arg(long)]
        export: bool,

        /// Cancel the stream after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },

    /// Expand a character range of a document in place
    Expand {
        /// Document to edit
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,

        /// First selected character (0-based)
        #[arg(long)]
        start: usize,

        /// One past the last selected character
        #[arg(long)]
        end: usize,

        /// Write the result back to the file instead of stdout
        #[arg(long)]
        in_place: bool,

        /// Cancel the stream after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },

    /// Export a text file as a document and print its download URL
    Export {
        /// Text to export
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { command, verbose } = cli;

    // Config commands must work even when the existing file is broken.
    if let Commands::Config { command } = &command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        };
    }

    let config = config::Config::load().context("load config")?;
    let _telemetry = telemetry::init(&config.logging, verbose).context("init logging")?;

    match command {
        Commands::Analyze { topic, file, json } => {
            commands::analyze::run(&config, &topic, file.as_deref(), json).await
        }
        Commands::Generate {
            prompt,
            prompt_file,
            instructions,
            plan,
            options,
            out,
            export,
            timeout_secs,
        } => {
            commands::generate::run(commands::generate::GenerateOptions {
                config: &config,
                prompt: prompt.as_deref(),
                prompt_file: prompt_file.as_deref(),
                instructions: instructions.as_deref(),
                plan: plan.as_deref(),
                options: &options,
                out: out.as_deref(),
                export,
                timeout_secs,
            })
            .await
        }
        Commands::Expand {
            file,
            start,
            end,
            in_place,
            timeout_secs,
        } => commands::expand::run(&config, &file, start, end, in_place, timeout_secs).await,
        Commands::Export { file } => commands::export::run(&config, &file).await,
        Commands::Config { .. } => Ok(()),
    }
}
