use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "w1log")]
#[command(about = "1-Wire sensor logger", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll sensors once and deliver pending batches
    Collect,
    /// Turn the archive into named time series and summaries
    Reduce {
        /// Only readings observed at or after this instant (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only readings observed before this instant (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Output directory, overriding reducer.output
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the HTTP endpoint that archives delivered batches
    Receive {
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Show outbox backlog and archive size
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "w1log=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = w1log::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Commands::Collect => {
            w1log::cli::collect::collect(config_path).await?;
        }
        Commands::Reduce {
            since,
            until,
            output,
        } => {
            w1log::cli::reduce::reduce(
                config_path,
                w1log::cli::reduce::ReduceArgs {
                    since,
                    until,
                    output,
                },
            )?;
        }
        Commands::Receive { listen } => {
            w1log::cli::receive::receive(config_path, listen).await?;
        }
        Commands::Status => {
            w1log::cli::status::status(config_path)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => {
                w1log::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                w1log::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
