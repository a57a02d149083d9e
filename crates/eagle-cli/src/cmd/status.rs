use crate::cmd::deploy::print_summary;
use crate::output::{print_json, print_table};
use anyhow::Context;
use eagle_core::run::DeploymentRun;
use std::path::Path;

pub fn run(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    if all {
        let runs = DeploymentRun::list(root).context("failed to read deployment runs")?;
        if json {
            return print_json(&runs);
        }
        if runs.is_empty() {
            println!("No deployment runs recorded.");
            return Ok(());
        }
        let rows = runs
            .iter()
            .rev()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    r.namespace.clone(),
                    r.outcome.to_string(),
                    r.phases.len().to_string(),
                    if r.dry_run { "yes" } else { "" }.to_string(),
                ]
            })
            .collect();
        print_table(&["ID", "STARTED", "NAMESPACE", "OUTCOME", "PHASES", "DRY-RUN"], rows);
        return Ok(());
    }

    let latest = DeploymentRun::latest(root).context("failed to read deployment runs")?;
    match (latest, json) {
        (Some(run), true) => print_json(&run)?,
        (Some(run), false) => print_summary(&run),
        (None, true) => print_json(&serde_json::Value::Null)?,
        (None, false) => println!("No deployment runs recorded."),
    }
    Ok(())
}
