//! AKS static egress gateway provisioner CLI.
//!
//! Creates an AKS cluster with a dedicated, tainted gateway node pool,
//! installs kube-egress-gateway, and proves that annotated pods leave the
//! cluster from the egress subnet.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use egress_cli::commands::check::CheckCommand;
use egress_cli::commands::provision::ProvisionCommand;
use egress_cli::commands::render::RenderCommand;
use egress_cli::commands::status::StatusCommand;
use egress_cli::commands::teardown::TeardownCommand;
use egress_cli::commands::verify::VerifyCommand;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// AKS Static Egress Gateway provisioner.
#[derive(Parser)]
#[command(
    name = "egress",
    version,
    about = "Provision an AKS static egress gateway",
    long_about = "Provision an AKS cluster with a kube-egress-gateway node pool.\n\n\
                  Creates the network, cluster, tainted gateway pool, managed identity\n\
                  and role assignments, installs the controller chart, and verifies that\n\
                  annotated pods egress from the gateway subnet.\n\n\
                  All operations are idempotent - re-running the same command will\n\
                  resume from where it left off."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision everything, resuming a previous run if one was interrupted.
    Provision(ProvisionCommand),

    /// Check local tools and the Azure CLI login.
    Check(CheckCommand),

    /// Re-run the egress source address check.
    Verify(VerifyCommand),

    /// Show saved provisioning progress.
    Status(StatusCommand),

    /// Print azure_config.yaml and the Kubernetes manifests.
    Render(RenderCommand),

    /// Delete the cluster and target resource groups.
    Teardown(TeardownCommand),
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "info,egress_cli=debug,egress_azure=debug"
    } else {
        "warn,egress_cli=info,egress_azure=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Provision(cmd) => cmd.run().await,
        Commands::Check(cmd) => cmd.run().await,
        Commands::Verify(cmd) => cmd.run().await,
        Commands::Status(cmd) => cmd.run().await,
        Commands::Render(cmd) => cmd.run().await,
        Commands::Teardown(cmd) => cmd.run().await,
    }
}
