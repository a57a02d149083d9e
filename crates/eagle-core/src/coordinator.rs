//! Per-region application of a phase.
//!
//! Regions are independent clusters: a failure in one never stops the others
//! from being attempted. Replicated phases are the exception to full
//! concurrency. The primary is rolled out and health-gated first, and only a
//! healthy primary lets the secondaries receive their replica manifests.

use std::collections::BTreeMap;
use std::path::Path;

use futures::future::join_all;

use crate::cleanup::{CleanupRegistry, TransientResource};
use crate::cluster::{args, run_checked, ClusterClient};
use crate::error::{EagleError, Result};
use crate::health::{wait_ready, Readiness, Sleeper};
use crate::manifest;
use crate::phase::{Action, Phase, ReadinessTarget};
use crate::region::{Region, RegionSet};
use crate::run::RegionOutcome;

pub struct RegionCoordinator<'a, C, S> {
    cluster: &'a C,
    sleeper: &'a S,
    cleanup: &'a CleanupRegistry,
    namespace: &'a str,
    manifest_root: &'a Path,
    dry_run: bool,
}

impl<'a, C: ClusterClient, S: Sleeper> RegionCoordinator<'a, C, S> {
    pub fn new(
        cluster: &'a C,
        sleeper: &'a S,
        cleanup: &'a CleanupRegistry,
        namespace: &'a str,
        manifest_root: &'a Path,
        dry_run: bool,
    ) -> Self {
        Self {
            cluster,
            sleeper,
            cleanup,
            namespace,
            manifest_root,
            dry_run,
        }
    }

    /// Apply `phase` to every targeted region and report each outcome by
    /// region id.
    pub async fn apply_to_regions(
        &self,
        phase: &Phase,
        regions: &RegionSet,
    ) -> BTreeMap<String, RegionOutcome> {
        let primary = regions.primary();
        let mut outcomes = BTreeMap::new();

        if !phase.per_region {
            let outcome = self.apply_region(phase, primary, &primary.id).await;
            outcomes.insert(primary.id.clone(), outcome);
            return outcomes;
        }

        if phase.is_replicated() {
            let primary_outcome = self.apply_region(phase, primary, &primary.id).await;
            let healthy = primary_outcome.is_success();
            outcomes.insert(primary.id.clone(), primary_outcome);

            let secondaries: Vec<&Region> = regions.secondaries().collect();
            if healthy {
                let results = join_all(
                    secondaries
                        .iter()
                        .map(|r| self.apply_region(phase, r, &primary.id)),
                )
                .await;
                for (region, outcome) in secondaries.iter().zip(results) {
                    outcomes.insert(region.id.clone(), outcome);
                }
            } else {
                tracing::warn!(
                    phase = %phase.name,
                    primary = %primary.id,
                    "primary not healthy; replica rollout skipped"
                );
                for region in secondaries {
                    outcomes.insert(
                        region.id.clone(),
                        RegionOutcome::Skipped {
                            reason: format!("primary region '{}' not healthy", primary.id),
                        },
                    );
                }
            }
            return outcomes;
        }

        let all: Vec<&Region> = regions.iter().collect();
        let results = join_all(all.iter().map(|r| self.apply_region(phase, r, &primary.id))).await;
        for (region, outcome) in all.iter().zip(results) {
            outcomes.insert(region.id.clone(), outcome);
        }
        outcomes
    }

    /// Run the phase's actions in order against one region, then its health
    /// gate. The first failing action ends the region's attempt.
    pub async fn apply_region(
        &self,
        phase: &Phase,
        region: &Region,
        primary_region: &str,
    ) -> RegionOutcome {
        let context = region.context();
        tracing::info!(phase = %phase.name, region = %region.id, role = %region.role, "applying phase");

        for action in &phase.actions {
            if let Err(e) = self.execute(action, region, &context, primary_region).await {
                tracing::error!(
                    phase = %phase.name,
                    region = %region.id,
                    action = %action.describe(),
                    error = %e,
                    "action failed"
                );
                return RegionOutcome::Failed {
                    error: format!("{}: {e}", action.describe()),
                };
            }
        }

        self.gate(phase, region, &context).await
    }

    async fn gate(&self, phase: &Phase, region: &Region, context: &str) -> RegionOutcome {
        let target = &phase.health.target;
        if *target == ReadinessTarget::None {
            return RegionOutcome::Succeeded { attempts: 0 };
        }
        if self.dry_run {
            tracing::info!(phase = %phase.name, region = %region.id, target = %target.describe(), "dry-run: health gate skipped");
            return RegionOutcome::Succeeded { attempts: 0 };
        }

        let label = format!("{}/{}", phase.name, region.id);
        let readiness = wait_ready(self.sleeper, &label, &phase.health.policy, move |_| {
            self.check_ready(target, context)
        })
        .await;

        match readiness {
            Readiness::Ready { attempts } => RegionOutcome::Succeeded { attempts },
            Readiness::TimedOut { attempts } => RegionOutcome::TimedOut { attempts },
        }
    }

    /// One readiness poll. Control-plane errors count as "not ready yet".
    pub async fn check_ready(&self, target: &ReadinessTarget, context: &str) -> bool {
        let ns = self.namespace;
        let (cmd, expect) = match target {
            ReadinessTarget::None => return true,
            ReadinessTarget::NamespaceActive => (args::namespace_phase(ns), Some("Active")),
            ReadinessTarget::NamespaceAbsent => (args::namespace_phase(ns), Some("")),
            ReadinessTarget::Rollout { resource } => (args::rollout_status(resource, ns), None),
            ReadinessTarget::PodsReady { selector } => (args::pods_ready(selector, ns), None),
            ReadinessTarget::PodSucceeded { pod } => (args::pod_phase(pod, ns), Some("Succeeded")),
            ReadinessTarget::Exec { resource, command } => {
                (args::exec(resource, ns, command), None)
            }
        };

        match self.cluster.run(context, &cmd, None).await {
            Ok(out) => out.success && expect.map_or(true, |e| out.stdout.trim() == e),
            Err(e) => {
                tracing::debug!(context, error = %e, "readiness poll errored");
                false
            }
        }
    }

    async fn execute(
        &self,
        action: &Action,
        region: &Region,
        context: &str,
        primary_region: &str,
    ) -> Result<()> {
        let ns = self.namespace;
        let dry = self.dry_run;

        match action {
            Action::EnsureNamespace => {
                let existing = run_checked(self.cluster, context, &args::namespace_phase(ns), None).await?;
                if existing.stdout.trim().is_empty() {
                    run_checked(self.cluster, context, &args::create_namespace(ns, dry), None).await?;
                    tracing::info!(region = %region.id, namespace = ns, "namespace created");
                } else {
                    tracing::debug!(region = %region.id, namespace = ns, "namespace exists");
                }
            }
            Action::Apply { manifest } => {
                let path = self.manifest_root.join(manifest);
                run_checked(self.cluster, context, &args::apply_file(&path, ns, dry), None).await?;
            }
            Action::ApplyReplicated { primary, replica } => {
                if region.is_primary() {
                    let path = self.manifest_root.join(primary);
                    run_checked(self.cluster, context, &args::apply_file(&path, ns, dry), None)
                        .await?;
                } else {
                    let path = self.manifest_root.join(replica);
                    let template = tokio::fs::read_to_string(&path).await.map_err(|e| {
                        EagleError::CommandFailed(format!(
                            "failed to read {}: {e}",
                            path.display()
                        ))
                    })?;
                    let rendered = manifest::render(
                        &template,
                        &manifest::replica_vars(&region.id, primary_region, ns),
                    );
                    run_checked(
                        self.cluster,
                        context,
                        &args::apply_stdin(ns, dry),
                        Some(&rendered),
                    )
                    .await?;
                }
            }
            Action::Scale {
                deployment,
                replicas,
            } => {
                run_checked(
                    self.cluster,
                    context,
                    &args::scale(deployment, *replicas, ns, dry),
                    None,
                )
                .await?;
            }
            Action::Secret { name, from_env } => {
                let mut data = BTreeMap::new();
                for (key, var) in from_env {
                    let value = std::env::var(var).map_err(|_| {
                        EagleError::CommandFailed(format!(
                            "environment variable '{var}' for secret '{name}' is not set"
                        ))
                    })?;
                    data.insert(key.clone(), value);
                }
                let manifest = args::secret_manifest(name, ns, &data);
                run_checked(self.cluster, context, &args::apply_stdin(ns, dry), Some(&manifest))
                    .await?;
            }
            Action::Exec { resource, command } => {
                if dry {
                    tracing::info!(region = %region.id, resource = %resource, "dry-run: exec skipped");
                } else {
                    run_checked(self.cluster, context, &args::exec(resource, ns, command), None)
                        .await?;
                }
            }
            Action::Probe {
                name,
                image,
                command,
            } => {
                if dry {
                    tracing::info!(region = %region.id, probe = %name, "dry-run: probe skipped");
                    return Ok(());
                }
                self.cleanup
                    .register(TransientResource::pod(&region.id, context, ns, name));
                // Clear a leftover from an interrupted run; absence is fine.
                self.cluster
                    .run(context, &args::delete_pod(name, ns), None)
                    .await?;
                run_checked(
                    self.cluster,
                    context,
                    &args::run_probe(name, image, command, ns),
                    None,
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::health::tests::RecordingSleeper;
    use crate::health::RetryPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    const EAST: &str = "eagle-us-east-1";
    const WEST: &str = "eagle-us-west-2";

    fn regions() -> RegionSet {
        RegionSet::from_pair("us-east-1", Some("us-west-2")).unwrap()
    }

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(n, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn failing_region_does_not_block_others() {
        let cluster = FakeCluster::new().fail(EAST, "apply");
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let root = Path::new("/deploy");
        let coord = RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", root, false);

        let phase = Phase::new(
            "services",
            vec![Action::Apply {
                manifest: "k8s/services".into(),
            }],
        );
        let outcomes = coord.apply_to_regions(&phase, &regions()).await;

        assert!(matches!(outcomes["us-east-1"], RegionOutcome::Failed { .. }));
        assert_eq!(outcomes["us-west-2"], RegionOutcome::Succeeded { attempts: 0 });
        assert_eq!(cluster.calls_matching("apply").len(), 2);
    }

    #[tokio::test]
    async fn primary_only_phase_targets_primary() {
        let cluster = FakeCluster::new();
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", Path::new("/"), false);

        let phase = Phase::new(
            "ingress",
            vec![Action::Apply {
                manifest: "k8s/ingress".into(),
            }],
        )
        .primary_only();
        let outcomes = coord.apply_to_regions(&phase, &regions()).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes.contains_key("us-east-1"));
        assert!(cluster.calls().iter().all(|c| c.context == EAST));
    }

    #[tokio::test]
    async fn replica_rollout_follows_healthy_primary() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("k8s")).unwrap();
        std::fs::write(
            dir.path().join("k8s/pg-replica.yaml"),
            "name: postgres-${REGION}\nprimaryHost: postgres.${PRIMARY_REGION}\n",
        )
        .unwrap();

        let cluster = FakeCluster::new().succeed_after(EAST, "rollout status", 2);
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", dir.path(), false);

        let phase = Phase::new(
            "data-layer",
            vec![Action::ApplyReplicated {
                primary: "k8s/pg-primary.yaml".into(),
                replica: "k8s/pg-replica.yaml".into(),
            }],
        )
        .with_health(
            ReadinessTarget::Rollout {
                resource: "statefulset/postgres".into(),
            },
            policy(3),
        );

        let outcomes = coord.apply_to_regions(&phase, &regions()).await;
        assert_eq!(outcomes["us-east-1"], RegionOutcome::Succeeded { attempts: 3 });
        assert_eq!(outcomes["us-west-2"], RegionOutcome::Succeeded { attempts: 1 });

        let calls = cluster.calls();
        let first_west = calls.iter().position(|c| c.context == WEST).unwrap();
        let last_east_gate = calls
            .iter()
            .rposition(|c| c.context == EAST && c.line().contains("rollout status"))
            .unwrap();
        assert!(last_east_gate < first_west, "replica started before primary was healthy");

        let primary_apply = &calls[0];
        assert!(primary_apply.line().contains("pg-primary.yaml"));
        let replica_apply = &calls[first_west];
        assert!(replica_apply.line().starts_with("apply -n eagle -f -"));
        assert_eq!(
            replica_apply.stdin.as_deref(),
            Some("name: postgres-us-west-2\nprimaryHost: postgres.us-east-1\n")
        );
    }

    #[tokio::test]
    async fn unhealthy_primary_skips_replicas() {
        let cluster = FakeCluster::new().fail(EAST, "rollout status");
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", Path::new("/"), false);

        let phase = Phase::new(
            "data-layer",
            vec![Action::ApplyReplicated {
                primary: "p.yaml".into(),
                replica: "r.yaml".into(),
            }],
        )
        .with_health(
            ReadinessTarget::Rollout {
                resource: "statefulset/postgres".into(),
            },
            policy(4),
        );

        let outcomes = coord.apply_to_regions(&phase, &regions()).await;
        assert_eq!(outcomes["us-east-1"], RegionOutcome::TimedOut { attempts: 4 });
        assert!(matches!(outcomes["us-west-2"], RegionOutcome::Skipped { .. }));
        assert!(cluster.calls().iter().all(|c| c.context == EAST));
        assert_eq!(sleeper.slept.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ensure_namespace_creates_only_when_absent() {
        let cluster = FakeCluster::new().stdout_sequence("get namespace", &["", "Active"], "Active");
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", Path::new("/"), false);

        let phase = Phase::new("namespace", vec![Action::EnsureNamespace]).with_health(
            ReadinessTarget::NamespaceActive,
            policy(3),
        );
        let region = Region::new("us-east-1", crate::region::RegionRole::Primary);
        let outcome = coord.apply_region(&phase, &region, "us-east-1").await;

        assert_eq!(outcome, RegionOutcome::Succeeded { attempts: 1 });
        assert_eq!(cluster.calls_matching("create namespace eagle").len(), 1);

        // Second pass: namespace already there.
        let outcome = coord.apply_region(&phase, &region, "us-east-1").await;
        assert!(outcome.is_success());
        assert_eq!(cluster.calls_matching("create namespace eagle").len(), 1);
    }

    #[tokio::test]
    async fn dry_run_skips_gates_and_probes() {
        let cluster = FakeCluster::new();
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", Path::new("/"), true);

        let phase = Phase::new(
            "validation",
            vec![
                Action::Apply {
                    manifest: "k8s/monitoring".into(),
                },
                Action::Probe {
                    name: "probe".into(),
                    image: "busybox".into(),
                    command: vec!["true".into()],
                },
            ],
        )
        .with_health(
            ReadinessTarget::PodSucceeded { pod: "probe".into() },
            policy(5),
        );

        let outcomes = coord.apply_to_regions(&phase, &regions()).await;
        assert!(outcomes.values().all(|o| o.is_success()));
        assert_eq!(cleanup.pending(), 0);
        let calls = cluster.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.line().ends_with("--dry-run=client")));
    }

    #[tokio::test]
    async fn secret_values_come_from_environment() {
        std::env::set_var("EAGLE_TEST_COORD_DB_PASSWORD", "hunter2");
        let cluster = FakeCluster::new();
        let sleeper = RecordingSleeper::default();
        let cleanup = CleanupRegistry::new();
        let coord =
            RegionCoordinator::new(&cluster, &sleeper, &cleanup, "eagle", Path::new("/"), false);

        let phase = Phase::new(
            "config",
            vec![Action::Secret {
                name: "db".into(),
                from_env: BTreeMap::from([(
                    "password".to_string(),
                    "EAGLE_TEST_COORD_DB_PASSWORD".to_string(),
                )]),
            }],
        );
        let region = Region::new("us-east-1", crate::region::RegionRole::Primary);
        assert!(coord.apply_region(&phase, &region, "us-east-1").await.is_success());

        let call = &cluster.calls()[0];
        assert!(!call.line().contains("hunter2"));
        assert!(call.stdin.as_deref().unwrap().contains("hunter2"));

        let missing = Phase::new(
            "config",
            vec![Action::Secret {
                name: "vault".into(),
                from_env: BTreeMap::from([(
                    "role_id".to_string(),
                    "EAGLE_TEST_COORD_UNSET_VAR".to_string(),
                )]),
            }],
        );
        let outcome = coord.apply_region(&missing, &region, "us-east-1").await;
        match outcome {
            RegionOutcome::Failed { error } => assert!(error.contains("EAGLE_TEST_COORD_UNSET_VAR")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
