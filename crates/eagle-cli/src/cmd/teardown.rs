use crate::cmd::deploy::ensure_torn_down;
use crate::cmd::{core_error, runtime, TargetArgs};
use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, args: TargetArgs, json: bool) -> anyhow::Result<()> {
    let target = args.resolve(root)?;
    let orch = target.orchestrator(root);

    let rt = runtime()?;
    let outcomes = rt
        .block_on(orch.teardown(&target.regions, &target.config.teardown))
        .map_err(|e| core_error(e, "teardown failed"))?;

    if json {
        print_json(&serde_json::json!({
            "namespace": target.namespace,
            "dry_run": target.dry_run,
            "regions": outcomes,
        }))?;
    } else {
        let rows = outcomes
            .iter()
            .map(|(region, o)| vec![region.clone(), o.to_string()])
            .collect();
        print_table(&["REGION", "RESULT"], rows);
    }
    ensure_torn_down(&outcomes)
}
