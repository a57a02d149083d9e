pub mod conflict;
pub mod deploy;
pub mod failover;
pub mod plan;
pub mod status;
pub mod teardown;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use eagle_core::cluster::Kubectl;
use eagle_core::config::{Config, WarnLevel};
use eagle_core::region::RegionSet;
use eagle_core::{EagleError, Orchestrator, RunOptions};
use std::path::Path;
use std::time::Duration;

use deploy::DeployExit;

// ---------------------------------------------------------------------------
// Shared target selection
// ---------------------------------------------------------------------------

/// Which regions and namespace a command acts on. Flags beat environment
/// variables, which beat `eagle.yaml`.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Primary region id
    #[arg(long, env = "PRIMARY_REGION")]
    pub primary_region: Option<String>,

    /// Secondary region id
    #[arg(long, env = "SECONDARY_REGION")]
    pub secondary_region: Option<String>,

    /// Kubernetes namespace
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Validate manifests with client-side dry-run; skip health gates and probes
    #[arg(long, env = "DRY_RUN", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub dry_run: bool,
}

/// Everything a cluster-facing command needs after config resolution.
pub struct Target {
    pub config: Config,
    pub regions: RegionSet,
    pub namespace: String,
    pub dry_run: bool,
}

impl TargetArgs {
    pub fn resolve(&self, root: &Path) -> anyhow::Result<Target> {
        let config = Config::load_or_default(root).context("failed to load eagle.yaml")?;
        check_config(&config)?;
        let regions = config
            .region_set(
                self.primary_region.as_deref(),
                self.secondary_region.as_deref(),
            )
            .context("invalid region selection")?;
        let namespace = self
            .namespace
            .clone()
            .unwrap_or_else(|| config.namespace.clone());
        Ok(Target {
            config,
            regions,
            namespace,
            dry_run: self.dry_run,
        })
    }
}

impl Target {
    pub fn orchestrator(&self, root: &Path) -> Orchestrator<Kubectl> {
        Orchestrator::new(
            Kubectl::new(),
            RunOptions {
                namespace: self.namespace.clone(),
                dry_run: self.dry_run,
                manifest_root: root.to_path_buf(),
            },
        )
    }
}

/// Log config warnings; refuse to act on config errors.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("eagle.yaml has errors; run 'eagle-deploy plan' to list them");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Async plumbing
// ---------------------------------------------------------------------------

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

/// Resolves on Ctrl-C, or once `timeout` elapses.
pub async fn shutdown_signal(timeout: Option<Duration>) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    match timeout {
        Some(limit) => {
            tokio::select! {
                _ = ctrl_c => tracing::warn!("interrupted"),
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(seconds = limit.as_secs(), "deployment timeout reached");
                }
            }
        }
        None => {
            ctrl_c.await;
            tracing::warn!("interrupted");
        }
    }
}

/// Map a missing prerequisite to its own exit code; everything else is a
/// generic failure.
pub fn core_error(e: EagleError, context: &'static str) -> anyhow::Error {
    match e {
        EagleError::PrerequisiteMissing(reason) => DeployExit::PrerequisiteMissing(reason).into(),
        other => anyhow::Error::new(other).context(context),
    }
}
