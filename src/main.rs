use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "cartpilot")]
#[command(version, about = "Goal-driven checkout automation orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true, env = "CARTPILOT_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted scenario through the orchestrator
    Replay {
        /// Path to the scenario file (JSON)
        scenario: PathBuf,

        /// Step budget, overriding the scenario and config file
        #[arg(long)]
        max_steps: Option<u32>,

        /// Print the outcome as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Serve progress streams and prompt endpoints
    Serve {
        /// Port to serve on (defaults to [server].port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local dashboard)
        #[arg(long)]
        dev: bool,

        /// Run a scripted scenario as a live session
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default cartpilot.toml file
    Init,
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "cartpilot=debug" } else { "cartpilot=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Replay {
            scenario,
            max_steps,
            json,
        } => {
            cmd::cmd_replay(&project_dir, cli.verbose, scenario, *max_steps, *json).await?;
        }
        Commands::Serve { port, dev, replay } => {
            cmd::cmd_serve(&project_dir, cli.verbose, *port, *dev, replay.clone()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
