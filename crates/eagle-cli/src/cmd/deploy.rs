use crate::cmd::{core_error, runtime, shutdown_signal, TargetArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use eagle_core::phase::without_apps;
use eagle_core::run::{DeploymentRun, RegionOutcome, RunOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// DeployExit: typed non-zero exit codes, mapped to process exit in main
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DeployExit {
    Failed(String),
    Degraded(String),
    PrerequisiteMissing(String),
    Cancelled,
}

impl DeployExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployExit::Failed(_) => 1,
            DeployExit::Degraded(_) => 2,
            DeployExit::PrerequisiteMissing(_) => 3,
            DeployExit::Cancelled => 130,
        }
    }
}

impl std::fmt::Display for DeployExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployExit::Failed(reason) => write!(f, "error: {reason}"),
            DeployExit::Degraded(reason) => write!(f, "warning: completed degraded: {reason}"),
            DeployExit::PrerequisiteMissing(reason) => {
                write!(f, "error: prerequisite missing: {reason}")
            }
            DeployExit::Cancelled => write!(f, "error: deployment cancelled"),
        }
    }
}

impl std::error::Error for DeployExit {}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Tear down the existing deployment before deploying
    #[arg(long)]
    pub cleanup: bool,

    /// Deploy infrastructure phases only
    #[arg(long)]
    pub skip_apps: bool,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(root: &Path, args: DeployArgs, json: bool) -> anyhow::Result<()> {
    let target = args.target.resolve(root)?;
    let mut phases = target.config.plan();
    if args.skip_apps {
        phases = without_apps(phases);
    }
    let orch = target.orchestrator(root);
    let timeout = args.timeout.map(Duration::from_secs);

    let rt = runtime()?;
    let run = rt.block_on(async {
        if args.cleanup {
            let outcomes = orch
                .teardown(&target.regions, &target.config.teardown)
                .await
                .map_err(|e| core_error(e, "teardown failed"))?;
            ensure_torn_down(&outcomes)?;
        }
        orch.run(&phases, &target.regions, shutdown_signal(timeout))
            .await
            .map_err(|e| core_error(e, "deployment failed"))
    })?;

    run.save(root).context("failed to record deployment run")?;

    if json {
        print_json(&run)?;
    } else {
        print_summary(&run);
    }
    exit_for(&run)
}

pub(crate) fn ensure_torn_down(outcomes: &BTreeMap<String, RegionOutcome>) -> anyhow::Result<()> {
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, o)| !o.is_success())
        .map(|(region, o)| format!("{region}: {o}"))
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(DeployExit::Failed(format!("teardown failed ({})", failed.join("; "))).into())
    }
}

pub(crate) fn exit_for(run: &DeploymentRun) -> anyhow::Result<()> {
    match run.outcome {
        RunOutcome::Success => Ok(()),
        _ if run.cancelled => Err(DeployExit::Cancelled.into()),
        RunOutcome::Degraded => {
            let reason = run
                .phases
                .iter()
                .filter_map(|p| p.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            Err(DeployExit::Degraded(reason).into())
        }
        RunOutcome::Failed => Err(DeployExit::Failed(
            run.error
                .clone()
                .unwrap_or_else(|| "deployment failed".to_string()),
        )
        .into()),
    }
}

pub(crate) fn print_summary(run: &DeploymentRun) {
    let mode = if run.dry_run { " (dry-run)" } else { "" };
    println!(
        "Run {} in namespace '{}' across {}{mode}",
        run.id,
        run.namespace,
        run.regions.join(", ")
    );
    let rows: Vec<Vec<String>> = run
        .phases
        .iter()
        .map(|p| {
            let regions = p
                .regions
                .iter()
                .map(|(id, o)| format!("{id}={}", o.label()))
                .collect::<Vec<_>>()
                .join(" ");
            vec![
                p.phase.clone(),
                p.status.to_string(),
                regions,
                format!("{}ms", p.duration_ms),
            ]
        })
        .collect();
    if !rows.is_empty() {
        println!();
        print_table(&["PHASE", "STATUS", "REGIONS", "DURATION"], rows);
    }
    for p in &run.phases {
        for (region, outcome) in p.failed_regions() {
            println!("  {} / {region}: {outcome}", p.phase);
        }
    }
    println!();
    println!("Outcome: {}", run.outcome);
}
