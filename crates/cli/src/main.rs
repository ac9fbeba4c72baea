//! Fleetreg CLI - Main Entry Point
//!
//! Administrative front end for the fleet registry: provision and remove
//! clients, inspect the fleet with its live sessions, and handle device
//! registrations. Every command is a request to the `fleetregd` service.

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod output;

use commands::{client, credential, watch};

/// Fleetreg CLI - OpenVPN fleet provisioning
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: config::ConfigArgs,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List provisioned and waiting clients with their live sessions
    List,

    /// Provision a client
    Add(client::AddArgs),

    /// Remove a client, terminating its session and revoking its certificate
    Remove(client::RemoveArgs),

    /// Print or save the connection bundle of a client
    Bundle(client::BundleArgs),

    /// Register a device the way it registers itself
    Register(client::RegisterArgs),

    /// Inspect or remove stored device credentials
    #[command(subcommand)]
    Credential(credential::CredentialCommands),

    /// Periodically print the fleet view
    Watch(watch::WatchArgs),

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let service = cli.config.open_client()?;

    match cli.command {
        Commands::List => client::list(&service, cli.format).await?,
        Commands::Add(args) => client::add(&service, args, cli.format).await?,
        Commands::Remove(args) => client::remove(&service, args, cli.format).await?,
        Commands::Bundle(args) => client::bundle(&service, args, cli.format).await?,
        Commands::Register(args) => client::register(&service, args, cli.format).await?,
        Commands::Credential(cmd) => credential::execute(&service, cmd, cli.format).await?,
        Commands::Watch(args) => watch::execute(&service, args, cli.format).await?,
        Commands::Config => {
            let config = cli.config.resolve()?;
            output::print_value(&config, cli.format);
        }
        Commands::Version => {
            println!("Fleetreg CLI v{}", fleetreg_common::VERSION);
        }
    }

    Ok(())
}
