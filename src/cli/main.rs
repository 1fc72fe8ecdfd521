//! Obscura CLI - infer join graphs and describe undocumented datasets
//!
//! Usage:
//!   obscura ingest <dir>
//!   obscura run [--from <stage>] [--to <stage>] [--output <file>] [--resume]
//!   obscura describe [--plain]
//!   obscura prompt <question>
//!   obscura status
//!
//! Examples:
//!   obscura ingest ./csv
//!   obscura run --from relations
//!   obscura prompt "Which customers ordered more than twice?"

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use obscura::{PipelineError, PipelineStage, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "obscura")]
#[command(about = "Statistical join-graph inference for undocumented relational datasets")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./obscura.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output; repeat for debug
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a directory of CSV files into the DuckDB database
    Ingest {
        /// Directory containing *.csv files
        dir: PathBuf,
    },

    /// Run the profiling pipeline
    Run {
        /// First stage to run
        #[arg(long, default_value = "catalog")]
        from: PipelineStage,

        /// Last stage to run
        #[arg(long, default_value = "serialize")]
        to: PipelineStage,

        /// Write the schema description to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Continue after the last completed stage of the previous run
        #[arg(long)]
        resume: bool,
    },

    /// Print the schema description from the persisted relation map
    Describe {
        /// Strip markdown emphasis characters
        #[arg(long)]
        plain: bool,
    },

    /// Print a query-generation prompt for a question
    Prompt {
        /// Natural-language question about the data
        question: String,
    },

    /// Show the checkpoint of the last run
    Status,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "obscura=warn",
        1 => "obscura=info",
        _ => "obscura=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => dispatch(cli.command, settings).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline_error) => eprintln!("Error: {}", pipeline_error.user_message()),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { dir } => commands::ingest::handle_ingest(&settings, &dir).await,
        Commands::Run {
            from,
            to,
            output,
            resume,
        } => {
            let args = commands::pipeline::RunArgs {
                from,
                to,
                output,
                resume,
            };
            commands::pipeline::handle_run(&settings, &args).await
        }
        Commands::Describe { plain } => commands::describe::handle_describe(&settings, plain).await,
        Commands::Prompt { question } => {
            commands::describe::handle_prompt(&settings, &question).await
        }
        Commands::Status => commands::pipeline::handle_status(&settings),
    }
}
