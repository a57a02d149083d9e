use crate::output::{print_json, print_table};
use anyhow::Context;
use eagle_core::config::{Config, WarnLevel};
use eagle_core::phase::{without_apps, ReadinessTarget};
use std::path::Path;

pub fn run(root: &Path, skip_apps: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load_or_default(root).context("failed to load eagle.yaml")?;
    let warnings = config.validate();
    let mut phases = config.plan();
    if skip_apps {
        phases = without_apps(phases);
    }

    if json {
        print_json(&serde_json::json!({
            "namespace": config.namespace,
            "phases": phases,
            "warnings": warnings,
        }))?;
    } else {
        let rows = phases
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let scope = if !p.per_region {
                    "primary"
                } else if p.is_replicated() {
                    "primary→replicas"
                } else {
                    "all"
                };
                let mut flags = Vec::new();
                if p.optional {
                    flags.push("optional");
                }
                if p.app {
                    flags.push("app");
                }
                if p.require_all_regions {
                    flags.push("all-regions");
                }
                let gate = match &p.health.target {
                    ReadinessTarget::None => "-".to_string(),
                    t => format!(
                        "{} ({}×{}s)",
                        t.describe(),
                        p.health.policy.max_attempts,
                        p.health.policy.interval_seconds
                    ),
                };
                vec![
                    (i + 1).to_string(),
                    p.name.clone(),
                    scope.to_string(),
                    p.actions.len().to_string(),
                    gate,
                    flags.join(","),
                ]
            })
            .collect();
        print_table(&["#", "PHASE", "REGIONS", "ACTIONS", "HEALTH GATE", "FLAGS"], rows);
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
