use crate::error::Result;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RegionOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegionOutcome {
    /// `attempts` is the health-gate poll count (0 when no gate ran).
    Succeeded { attempts: u32 },
    Failed { error: String },
    TimedOut { attempts: u32 },
    Skipped { reason: String },
}

impl RegionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RegionOutcome::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RegionOutcome::Succeeded { .. } => "succeeded",
            RegionOutcome::Failed { .. } => "failed",
            RegionOutcome::TimedOut { .. } => "timed_out",
            RegionOutcome::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for RegionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionOutcome::Succeeded { attempts } => write!(f, "succeeded ({attempts} poll(s))"),
            RegionOutcome::Failed { error } => write!(f, "failed: {error}"),
            RegionOutcome::TimedOut { attempts } => {
                write!(f, "timed out after {attempts} attempt(s)")
            }
            RegionOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseStatus / RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    /// Some regions failed while others succeeded.
    Degraded,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Degraded => "degraded",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    #[serde(alias = "partial")]
    Degraded,
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Degraded => "degraded",
            RunOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: String,
    pub status: PhaseStatus,
    pub regions: BTreeMap<String, RegionOutcome>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseResult {
    /// Regions that did not succeed, in region-id order.
    pub fn failed_regions(&self) -> Vec<(&str, &RegionOutcome)> {
        self.regions
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(id, o)| (id.as_str(), o))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DeploymentRun
// ---------------------------------------------------------------------------

/// One orchestrator invocation. Phase results are append-only and always
/// form a prefix of the phase list that was run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub namespace: String,
    #[serde(default)]
    pub dry_run: bool,
    pub regions: Vec<String>,
    pub phases: Vec<PhaseResult>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl DeploymentRun {
    pub fn start(namespace: impl Into<String>, regions: Vec<String>, dry_run: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            namespace: namespace.into(),
            dry_run,
            regions,
            phases: Vec::new(),
            outcome: RunOutcome::Success,
            error: None,
            cancelled: false,
        }
    }

    /// Append a phase result. A degraded phase downgrades a successful run;
    /// nothing downgrades a failed run further.
    pub fn record(&mut self, result: PhaseResult, degrade: bool) {
        if degrade && self.outcome == RunOutcome::Success {
            self.outcome = RunOutcome::Degraded;
        }
        self.phases.push(result);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.outcome = RunOutcome::Failed;
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Interrupted before completion; recorded results are kept.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.fail(crate::error::EagleError::Cancelled.to_string());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds().max(0) as u64)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn save(&self, root: &Path) -> Result<()> {
        let stamp = self.started_at.format("%Y%m%dT%H%M%SZ").to_string();
        let path = paths::run_path(root, &stamp, &self.id.to_string());
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// All recorded runs, oldest first.
    pub fn list(root: &Path) -> Result<Vec<DeploymentRun>> {
        let dir = paths::runs_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();

        let mut runs = Vec::with_capacity(files.len());
        for path in files {
            let data = std::fs::read_to_string(&path)?;
            runs.push(serde_yaml::from_str(&data)?);
        }
        Ok(runs)
    }

    pub fn latest(root: &Path) -> Result<Option<DeploymentRun>> {
        Ok(Self::list(root)?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn result(name: &str, status: PhaseStatus) -> PhaseResult {
        PhaseResult {
            phase: name.to_string(),
            status,
            regions: BTreeMap::from([(
                "us-east-1".to_string(),
                RegionOutcome::Succeeded { attempts: 1 },
            )]),
            duration_ms: 10,
            error: None,
        }
    }

    #[test]
    fn degrade_does_not_override_failure() {
        let mut run = DeploymentRun::start("eagle", vec!["us-east-1".into()], false);
        run.record(result("a", PhaseStatus::Succeeded), false);
        assert_eq!(run.outcome, RunOutcome::Success);
        run.record(result("b", PhaseStatus::Degraded), true);
        assert_eq!(run.outcome, RunOutcome::Degraded);
        run.fail("boom");
        run.record(result("c", PhaseStatus::Degraded), true);
        assert_eq!(run.outcome, RunOutcome::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
    }

    #[test]
    fn save_and_list_orders_by_start_time() {
        let dir = TempDir::new().unwrap();
        let mut older = DeploymentRun::start("eagle", vec![], false);
        older.started_at = Utc::now() - Duration::hours(1);
        older.finish();
        let mut newer = DeploymentRun::start("eagle", vec![], true);
        newer.record(result("namespace", PhaseStatus::Succeeded), false);
        newer.finish();

        newer.save(dir.path()).unwrap();
        older.save(dir.path()).unwrap();

        let runs = DeploymentRun::list(dir.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, older.id);
        let latest = DeploymentRun::latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert!(latest.dry_run);
        assert_eq!(latest.phases[0].phase, "namespace");
    }

    #[test]
    fn list_without_runs_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(DeploymentRun::list(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn partial_is_read_as_degraded() {
        let o: RunOutcome = serde_yaml::from_str("partial").unwrap();
        assert_eq!(o, RunOutcome::Degraded);
    }
}
