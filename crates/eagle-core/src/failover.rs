//! Manual promotion of a secondary region.
//!
//! The region set only changes roles here, and only after the target has
//! passed its promotion health gate.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterClient;
use crate::error::{EagleError, Result};
use crate::health::{RetryPolicy, Sleeper};
use crate::phase::{Action, HealthCheck, Phase, ReadinessTarget};
use crate::region::RegionSet;
use crate::run::RegionOutcome;
use crate::sequencer::Orchestrator;

const FAILOVER_PHASE: &str = "failover";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Actions run against the target region before it becomes primary.
    #[serde(default)]
    pub promote: Vec<Action>,
    #[serde(default)]
    pub health: HealthCheck,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            promote: vec![
                Action::Exec {
                    resource: "statefulset/postgres".into(),
                    command: vec![
                        "su".into(),
                        "postgres".into(),
                        "-c".into(),
                        "pg_ctl promote -D /var/lib/postgresql/data".into(),
                    ],
                },
                Action::Exec {
                    resource: "statefulset/redis".into(),
                    command: vec!["redis-cli".into(), "replicaof".into(), "no".into(), "one".into()],
                },
            ],
            health: HealthCheck::new(
                ReadinessTarget::Exec {
                    resource: "statefulset/postgres".into(),
                    command: vec!["pg_isready".into()],
                },
                RetryPolicy::default(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverReport {
    pub previous_primary: String,
    pub new_primary: String,
    pub outcome: RegionOutcome,
}

impl<C: ClusterClient, S: Sleeper> Orchestrator<C, S> {
    /// Promote `to` to primary. On any failure the region set is left as it
    /// was.
    pub async fn failover(
        &self,
        regions: &mut RegionSet,
        to: &str,
        config: &FailoverConfig,
    ) -> Result<FailoverReport> {
        let target = regions
            .get(to)
            .cloned()
            .ok_or_else(|| EagleError::RegionNotFound(to.to_string()))?;
        if target.is_primary() {
            return Err(EagleError::InvalidRegionSet(format!(
                "'{to}' is already the primary region"
            )));
        }
        let previous = regions.primary().id.clone();

        self.cluster.preflight(&[target.context()]).await?;
        tracing::info!(from = %previous, to = %target.id, "failover started");

        let mut phase = Phase::new(FAILOVER_PHASE, config.promote.clone());
        phase.health = config.health.clone();
        let outcome = self
            .coordinator()
            .apply_region(&phase, &target, &previous)
            .await;
        self.cleanup.release_all(&self.cluster).await;

        match &outcome {
            RegionOutcome::Succeeded { .. } => {}
            RegionOutcome::TimedOut { attempts } => {
                return Err(EagleError::PhaseTimeout {
                    phase: FAILOVER_PHASE.into(),
                    region: target.id.clone(),
                    attempts: *attempts,
                });
            }
            other => {
                return Err(EagleError::PhaseActionFailed {
                    phase: FAILOVER_PHASE.into(),
                    region: target.id.clone(),
                    reason: other.to_string(),
                });
            }
        }

        regions.promote(&target.id)?;
        tracing::info!(primary = %target.id, previous = %previous, "failover complete");
        Ok(FailoverReport {
            previous_primary: previous,
            new_primary: target.id,
            outcome,
        })
    }
}
