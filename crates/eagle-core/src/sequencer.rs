//! Ordered, health-gated phase execution.
//!
//! ```text
//! preflight ──▶ phase 1 ──▶ phase 2 ──▶ … ──▶ phase n
//!                 │ required failure: stop
//!                 │ optional / partial failure: degrade, continue
//!                 ▼
//!          release transient resources (every exit path)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use futures::FutureExt;

use crate::cleanup::CleanupRegistry;
use crate::cluster::ClusterClient;
use crate::coordinator::RegionCoordinator;
use crate::error::{EagleError, Result};
use crate::health::{Sleeper, TokioSleeper};
use crate::phase::Phase;
use crate::region::RegionSet;
use crate::run::{DeploymentRun, PhaseResult, PhaseStatus, RegionOutcome};

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub namespace: String,
    pub dry_run: bool,
    /// Base directory manifest paths are resolved against.
    pub manifest_root: PathBuf,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<C, S = TokioSleeper> {
    pub(crate) cluster: C,
    pub(crate) sleeper: S,
    pub(crate) options: RunOptions,
    pub(crate) cleanup: CleanupRegistry,
}

impl<C: ClusterClient> Orchestrator<C, TokioSleeper> {
    pub fn new(cluster: C, options: RunOptions) -> Self {
        Self::with_sleeper(cluster, TokioSleeper, options)
    }
}

impl<C: ClusterClient, S: Sleeper> Orchestrator<C, S> {
    pub fn with_sleeper(cluster: C, sleeper: S, options: RunOptions) -> Self {
        Self {
            cluster,
            sleeper,
            options,
            cleanup: CleanupRegistry::new(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub(crate) fn coordinator(&self) -> RegionCoordinator<'_, C, S> {
        RegionCoordinator::new(
            &self.cluster,
            &self.sleeper,
            &self.cleanup,
            &self.options.namespace,
            &self.options.manifest_root,
            self.options.dry_run,
        )
    }

    /// Verify tooling and every region's context. Nothing is applied if this
    /// fails.
    pub async fn preflight(&self, regions: &RegionSet) -> Result<()> {
        let contexts: Vec<String> = regions.iter().map(|r| r.context()).collect();
        self.cluster.preflight(&contexts).await
    }

    /// Run `phases` in order against `regions`.
    ///
    /// Returns `Err` only for `PrerequisiteMissing`; every other failure is
    /// reported through the returned run. `shutdown` ends the run early when
    /// it completes. Transient resources are released before this returns,
    /// including when a phase panics (the panic is resumed afterwards).
    pub async fn run<F>(
        &self,
        phases: &[Phase],
        regions: &RegionSet,
        shutdown: F,
    ) -> Result<DeploymentRun>
    where
        F: Future<Output = ()>,
    {
        self.preflight(regions).await?;

        let run = Mutex::new(DeploymentRun::start(
            self.options.namespace.clone(),
            regions.iter().map(|r| r.id.clone()).collect(),
            self.options.dry_run,
        ));
        tracing::info!(
            phases = phases.len(),
            regions = regions.len(),
            namespace = %self.options.namespace,
            dry_run = self.options.dry_run,
            "deployment started"
        );

        let body = AssertUnwindSafe(self.run_phases(phases, regions, &run)).catch_unwind();
        let finished = tokio::select! {
            result = body => Some(result),
            _ = shutdown => None,
        };

        let released = self.cleanup.release_all(&self.cluster).await;
        if released > 0 {
            tracing::info!(released, "transient resources released");
        }

        let mut run = run.into_inner().unwrap_or_else(|p| p.into_inner());
        match finished {
            Some(Ok(())) => {}
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => {
                tracing::warn!("deployment cancelled");
                run.cancel();
            }
        }
        run.finish();
        tracing::info!(outcome = %run.outcome, phases = run.phases.len(), "deployment finished");
        Ok(run)
    }

    async fn run_phases(&self, phases: &[Phase], regions: &RegionSet, run: &Mutex<DeploymentRun>) {
        let coordinator = self.coordinator();

        for phase in phases {
            let started = Instant::now();
            let outcomes = coordinator.apply_to_regions(phase, regions).await;
            let status = phase_status(phase, &outcomes);
            let error = first_error(phase, &outcomes);

            let result = PhaseResult {
                phase: phase.name.clone(),
                status,
                regions: outcomes,
                duration_ms: started.elapsed().as_millis() as u64,
                error: error.as_ref().map(|e| e.to_string()),
            };

            let mut guard = run.lock().unwrap_or_else(|p| p.into_inner());
            match status {
                PhaseStatus::Succeeded => {
                    tracing::info!(phase = %phase.name, "phase succeeded");
                    guard.record(result, false);
                }
                PhaseStatus::Failed if !phase.optional => {
                    let err = error.unwrap_or_else(|| EagleError::PhaseActionFailed {
                        phase: phase.name.clone(),
                        region: "-".into(),
                        reason: "unknown".into(),
                    });
                    tracing::error!(phase = %phase.name, error = %err, "required phase failed; stopping");
                    guard.record(result, false);
                    guard.fail(err.to_string());
                    return;
                }
                PhaseStatus::Failed | PhaseStatus::Degraded => {
                    tracing::warn!(
                        phase = %phase.name,
                        status = %status,
                        optional = phase.optional,
                        "phase degraded; continuing"
                    );
                    guard.record(result, true);
                }
            }
        }
    }
}

/// All regions succeeded → succeeded. Every region failed, or any failed on a
/// `require_all_regions` phase → failed. Otherwise the phase is degraded.
pub fn phase_status(
    phase: &Phase,
    outcomes: &BTreeMap<String, RegionOutcome>,
) -> PhaseStatus {
    let failed = outcomes.values().filter(|o| !o.is_success()).count();
    if failed == 0 {
        PhaseStatus::Succeeded
    } else if failed == outcomes.len() || phase.require_all_regions {
        PhaseStatus::Failed
    } else {
        PhaseStatus::Degraded
    }
}

fn first_error(
    phase: &Phase,
    outcomes: &BTreeMap<String, RegionOutcome>,
) -> Option<EagleError> {
    let failed: Vec<_> = outcomes.iter().filter(|(_, o)| !o.is_success()).collect();
    if !failed.is_empty() && failed.len() < outcomes.len() && !phase.require_all_regions {
        return Some(EagleError::PartialRegionFailure {
            phase: phase.name.clone(),
            failed: failed.len(),
        });
    }
    // Prefer the root cause over downstream skips.
    let (region, outcome) = failed
        .iter()
        .find(|(_, o)| !matches!(o, RegionOutcome::Skipped { .. }))
        .or_else(|| failed.first())?;
    Some(match outcome {
        RegionOutcome::TimedOut { attempts } => EagleError::PhaseTimeout {
            phase: phase.name.clone(),
            region: (*region).clone(),
            attempts: *attempts,
        },
        RegionOutcome::Failed { error } => EagleError::PhaseActionFailed {
            phase: phase.name.clone(),
            region: (*region).clone(),
            reason: error.clone(),
        },
        RegionOutcome::Skipped { reason } => EagleError::PhaseActionFailed {
            phase: phase.name.clone(),
            region: (*region).clone(),
            reason: reason.clone(),
        },
        RegionOutcome::Succeeded { .. } => return None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
