use crate::cmd::{core_error, runtime, TargetArgs};
use crate::output::print_json;
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path, to: &str, args: TargetArgs, json: bool) -> anyhow::Result<()> {
    let mut target = args.resolve(root)?;
    let orch = target.orchestrator(root);
    let mut regions = target.regions.clone();

    let rt = runtime()?;
    let report = rt
        .block_on(orch.failover(&mut regions, to, &target.config.failover))
        .map_err(|e| core_error(e, "failover failed"))?;

    if target.dry_run {
        tracing::info!("dry-run: region roles not persisted");
    } else {
        target.config.regions = Some(regions);
        target
            .config
            .save(root)
            .context("failed to persist promoted region set")?;
    }

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Promoted '{}' to primary (was '{}').",
            report.new_primary, report.previous_primary
        );
    }
    Ok(())
}
