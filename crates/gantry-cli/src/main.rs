//! Gantry CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::web::WebArgs;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry build scheduler", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "GANTRY_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and build tracker against the database
    Web(WebArgs),
    /// Compile a job's build plan and print it as JSON
    Plan {
        /// Path to the pipeline configuration
        path: PathBuf,
        /// Job to compile
        job: String,
        /// JSON file with the build inputs; pinned or empty versions otherwise
        #[arg(long)]
        inputs: Option<PathBuf>,
    },
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "pipeline.kdl")]
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Web(args) => {
            commands::web::run(args).await?;
        }
        Commands::Plan { path, job, inputs } => {
            commands::plan::run(&path, &job, inputs.as_deref())?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
