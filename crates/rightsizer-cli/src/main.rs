//! Cluster Rightsizer CLI
//!
//! A command-line tool for analyzing transient clusters, approving
//! right-sizing trials and inspecting their outcome.

mod app;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{checkpoints, clusters, costs, trial};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Cluster Rightsizer CLI
#[derive(Parser)]
#[command(name = "rightsizer")]
#[command(author, version, about = "Right-size transient compute clusters with a reversible trial run", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/rightsizer/config.toml)
    #[arg(long, global = true, env = "RIGHTSIZER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List recently finished transient clusters
    Clusters,

    /// Analyze a cluster and save the proposal for approval
    Analyze {
        /// Cluster name (also names its config record)
        cluster_name: String,

        /// Analyze this cluster run instead of the most recent one
        #[arg(long)]
        cluster_id: Option<String>,
    },

    /// Approve a proposal and run the trial
    Approve {
        /// Approval ID printed by `analyze`
        id: String,
    },

    /// Reject a pending proposal
    Reject {
        /// Approval ID to cancel
        id: String,
    },

    /// Show a proposal and its trial run
    Status {
        /// Approval ID
        id: String,

        /// Include the run's audit events
        #[arg(long)]
        events: bool,
    },

    /// List saved proposals and runs
    List,

    /// Restore the config record of a run flagged for manual action
    Restore {
        /// Approval ID of the flagged run
        id: String,
    },

    /// Show the cost comparison of a proposal
    Costs {
        /// Approval ID
        id: String,
    },

    /// Show the instance pricing catalog
    Catalog {
        /// Only show one instance family (e.g. r5)
        #[arg(long)]
        family: Option<String>,
    },
}

fn init_tracing(log_json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.verbose);

    let settings = config::Settings::load(cli.config.as_deref())?;
    let app = app::App::new(settings, cli.format);

    match cli.command {
        Commands::Clusters => clusters::list_clusters(&app).await?,
        Commands::Analyze {
            cluster_name,
            cluster_id,
        } => clusters::analyze(&app, &cluster_name, cluster_id.as_deref()).await?,
        Commands::Approve { id } => trial::approve(&app, &id).await?,
        Commands::Reject { id } => trial::reject(&app, &id).await?,
        Commands::Status { id, events } => checkpoints::status(&app, &id, events).await?,
        Commands::List => checkpoints::list(&app).await?,
        Commands::Restore { id } => trial::restore(&app, &id).await?,
        Commands::Costs { id } => costs::show_costs(&app, &id).await?,
        Commands::Catalog { family } => costs::show_catalog(&app, family.as_deref())?,
    }

    Ok(())
}
