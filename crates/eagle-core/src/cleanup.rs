//! Release of transient resources and teardown of prior deployments.
//!
//! Probe pods are registered *before* they are created, so a crash between
//! creation and registration cannot leak them. `release_all` drains the
//! registry: each registered resource is deleted exactly once no matter how
//! often it is called.

use std::collections::BTreeMap;
use std::sync::Mutex;

use futures::future::join_all;

use crate::cluster::{args, run_checked, ClusterClient};
use crate::error::Result;
use crate::health::{wait_ready, Readiness, RetryPolicy, Sleeper};
use crate::phase::ReadinessTarget;
use crate::region::{Region, RegionSet};
use crate::run::RegionOutcome;
use crate::sequencer::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    Pod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientResource {
    pub region: String,
    pub context: String,
    pub namespace: String,
    pub kind: TransientKind,
    pub name: String,
}

impl TransientResource {
    pub fn pod(region: &str, context: &str, namespace: &str, name: &str) -> Self {
        Self {
            region: region.to_string(),
            context: context.to_string(),
            namespace: namespace.to_string(),
            kind: TransientKind::Pod,
            name: name.to_string(),
        }
    }

    fn delete_args(&self) -> Vec<String> {
        match self.kind {
            TransientKind::Pod => args::delete_pod(&self.name, &self.namespace),
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanupRegistry {
    pending: Mutex<Vec<TransientResource>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same resource twice keeps a single entry.
    pub fn register(&self, resource: TransientResource) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if !pending.contains(&resource) {
            tracing::debug!(region = %resource.region, name = %resource.name, "registered transient resource");
            pending.push(resource);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Delete every registered resource, most recent first. Failures are
    /// logged, never propagated. Returns the number of resources released.
    pub async fn release_all<C: ClusterClient>(&self, cluster: &C) -> usize {
        let drained = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *pending)
        };
        let count = drained.len();
        for resource in drained.into_iter().rev() {
            match cluster
                .run(&resource.context, &resource.delete_args(), None)
                .await
            {
                Ok(out) if out.success => {
                    tracing::info!(region = %resource.region, name = %resource.name, "released transient resource");
                }
                Ok(out) => {
                    tracing::warn!(
                        region = %resource.region,
                        name = %resource.name,
                        output = %out.summary(),
                        "failed to release transient resource"
                    );
                }
                Err(e) => {
                    tracing::warn!(region = %resource.region, name = %resource.name, error = %e, "failed to release transient resource");
                }
            }
        }
        count
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().map(|p| p.len()).unwrap_or(0);
        if pending > 0 {
            tracing::warn!(pending, "cleanup registry dropped with unreleased transient resources");
        }
    }
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

impl<C: ClusterClient, S: Sleeper> Orchestrator<C, S> {
    /// Delete the namespace in every region and wait until it is gone.
    /// Regions are torn down concurrently and independently.
    pub async fn teardown(
        &self,
        regions: &RegionSet,
        policy: &RetryPolicy,
    ) -> Result<BTreeMap<String, RegionOutcome>> {
        self.preflight(regions).await?;
        self.cleanup.release_all(&self.cluster).await;

        tracing::info!(namespace = %self.options.namespace, regions = regions.len(), "teardown started");
        let all: Vec<&Region> = regions.iter().collect();
        let results = join_all(all.iter().map(|r| self.teardown_region(r, policy))).await;

        let mut outcomes = BTreeMap::new();
        for (region, outcome) in all.iter().zip(results) {
            outcomes.insert(region.id.clone(), outcome);
        }
        Ok(outcomes)
    }

    async fn teardown_region(&self, region: &Region, policy: &RetryPolicy) -> RegionOutcome {
        let context = region.context();
        let ns = self.options.namespace.as_str();
        let delete = args::delete_namespace(ns, self.options.dry_run);
        if let Err(e) = run_checked(&self.cluster, &context, &delete, None).await {
            tracing::error!(region = %region.id, error = %e, "namespace delete failed");
            return RegionOutcome::Failed {
                error: e.to_string(),
            };
        }
        if self.options.dry_run {
            return RegionOutcome::Succeeded { attempts: 0 };
        }

        let coordinator = self.coordinator();
        let coordinator = &coordinator;
        let absent = ReadinessTarget::NamespaceAbsent;
        let target = &absent;
        let ctx = context.as_str();
        let label = format!("teardown/{}", region.id);
        match wait_ready(&self.sleeper, &label, policy, move |_| {
            coordinator.check_ready(target, ctx)
        })
        .await
        {
            Readiness::Ready { attempts } => {
                tracing::info!(region = %region.id, namespace = ns, "namespace removed");
                RegionOutcome::Succeeded { attempts }
            }
            Readiness::TimedOut { attempts } => RegionOutcome::TimedOut { attempts },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::health::tests::RecordingSleeper;
    use crate::sequencer::RunOptions;
    use std::time::Duration;

    fn orchestrator(cluster: FakeCluster, dry_run: bool) -> Orchestrator<FakeCluster, RecordingSleeper> {
        Orchestrator::with_sleeper(
            cluster,
            RecordingSleeper::default(),
            RunOptions {
                namespace: "eagle".into(),
                dry_run,
                manifest_root: "/".into(),
            },
        )
    }

    fn regions() -> RegionSet {
        RegionSet::from_pair("us-east-1", Some("us-west-2")).unwrap()
    }

    #[tokio::test]
    async fn release_all_deletes_each_resource_once() {
        let cluster = FakeCluster::new();
        let registry = CleanupRegistry::new();
        let probe = TransientResource::pod("us-east-1", "eagle-us-east-1", "eagle", "probe");
        registry.register(probe.clone());
        registry.register(probe);
        registry.register(TransientResource::pod(
            "us-west-2",
            "eagle-us-west-2",
            "eagle",
            "probe",
        ));

        assert_eq!(registry.release_all(&cluster).await, 2);
        assert_eq!(registry.release_all(&cluster).await, 0);

        let deletes = cluster.calls_matching("delete pod probe");
        assert_eq!(deletes.len(), 2);
        assert_eq!(deletes[0].context, "eagle-us-west-2");
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn release_failure_is_not_retried() {
        let cluster = FakeCluster::new().fail_everywhere("delete pod");
        let registry = CleanupRegistry::new();
        registry.register(TransientResource::pod("a", "ctx-a", "eagle", "probe"));

        assert_eq!(registry.release_all(&cluster).await, 1);
        assert_eq!(registry.release_all(&cluster).await, 0);
        assert_eq!(cluster.calls_matching("delete pod").len(), 1);
    }

    #[tokio::test]
    async fn teardown_waits_for_namespace_to_disappear() {
        let cluster = FakeCluster::new().stdout_sequence("get namespace", &["Terminating"], "");
        let orch = orchestrator(cluster, false);
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let outcomes = orch.teardown(&regions(), &policy).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(|o| o.is_success()));
        let total: u32 = outcomes
            .values()
            .map(|o| match o {
                RegionOutcome::Succeeded { attempts } => *attempts,
                _ => 0,
            })
            .sum();
        assert_eq!(total, 3);
        assert_eq!(orch.cluster().calls_matching("delete namespace eagle").len(), 2);
    }

    #[tokio::test]
    async fn teardown_region_failure_is_isolated() {
        let cluster = FakeCluster::new()
            .fail("eagle-us-east-1", "delete namespace")
            .stdout_sequence("get namespace", &[], "");
        let orch = orchestrator(cluster, false);
        let policy = RetryPolicy::new(2, Duration::from_secs(1));

        let outcomes = orch.teardown(&regions(), &policy).await.unwrap();
        assert!(matches!(outcomes["us-east-1"], RegionOutcome::Failed { .. }));
        assert_eq!(outcomes["us-west-2"], RegionOutcome::Succeeded { attempts: 1 });
    }

    #[tokio::test]
    async fn teardown_stuck_namespace_times_out() {
        let orch = orchestrator(FakeCluster::new(), false);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let outcomes = orch.teardown(&regions(), &policy).await.unwrap();
        assert_eq!(outcomes["us-east-1"], RegionOutcome::TimedOut { attempts: 3 });
    }

    #[tokio::test]
    async fn dry_run_teardown_does_not_wait() {
        let orch = orchestrator(FakeCluster::new(), true);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let outcomes = orch.teardown(&regions(), &policy).await.unwrap();
        assert!(outcomes.values().all(|o| o.is_success()));
        assert!(orch.cluster().calls_matching("get namespace").is_empty());
        assert!(orch
            .cluster()
            .calls()
            .iter()
            .all(|c| c.line().ends_with("--dry-run=client")));
    }
}
