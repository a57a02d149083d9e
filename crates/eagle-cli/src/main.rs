mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    conflict::ConflictSubcommand,
    deploy::{DeployArgs, DeployExit},
    TargetArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "eagle-deploy",
    about = "Ordered, health-gated multi-region deployment and failover for the Eagle platform",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from eagle.yaml or .eagle/)
    #[arg(long, global = true, env = "EAGLE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the phase plan against every region
    Deploy(DeployArgs),

    /// Show the phase plan without touching any cluster
    Plan {
        /// Leave out application workload phases
        #[arg(long)]
        skip_apps: bool,
    },

    /// Delete the deployment namespace in every region
    Teardown(TargetArgs),

    /// Promote a secondary region to primary
    Failover {
        /// Region to promote
        #[arg(long)]
        to: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the most recent deployment run
    Status {
        /// List every recorded run instead
        #[arg(long)]
        all: bool,
    },

    /// Resolve and audit cross-region data conflicts
    Conflict {
        #[command(subcommand)]
        subcommand: ConflictSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Deploy(_) | Commands::Teardown(_) | Commands::Failover { .. } => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Deploy(args) => cmd::deploy::run(&root, args, cli.json),
        Commands::Plan { skip_apps } => cmd::plan::run(&root, skip_apps, cli.json),
        Commands::Teardown(target) => cmd::teardown::run(&root, target, cli.json),
        Commands::Failover { to, target } => cmd::failover::run(&root, &to, target, cli.json),
        Commands::Status { all } => cmd::status::run(&root, all, cli.json),
        Commands::Conflict { subcommand } => cmd::conflict::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<DeployExit>() {
            eprintln!("{exit}");
            std::process::exit(exit.exit_code());
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
