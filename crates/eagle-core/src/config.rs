use crate::conflict::{ConflictPolicy, Strategy};
use crate::error::{EagleError, Result};
use crate::failover::FailoverConfig;
use crate::health::RetryPolicy;
use crate::paths;
use crate::phase::{default_plan, Action, Phase, ReadinessTarget};
use crate::region::{Region, RegionRole, RegionSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_PRIMARY_REGION: &str = "us-east-1";
pub const DEFAULT_SECONDARY_REGION: &str = "us-west-2";
pub const DEFAULT_NAMESPACE: &str = "eagle";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

/// Contents of `eagle.yaml`. Every section is optional; an absent file means
/// the built-in plan against the default region pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<RegionSet>,
    /// Replaces the built-in phase plan when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<Phase>>,
    /// How long teardown waits for a namespace to disappear.
    #[serde(default)]
    pub teardown: RetryPolicy,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub conflicts: ConflictPolicy,
}

fn default_version() -> u32 {
    1
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            namespace: default_namespace(),
            regions: None,
            phases: None,
            teardown: RetryPolicy::default(),
            failover: FailoverConfig::default(),
            conflicts: ConflictPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(EagleError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        match Self::load(root) {
            Err(EagleError::NotInitialized) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// The configured phase plan, or the built-in one.
    pub fn plan(&self) -> Vec<Phase> {
        self.phases.clone().unwrap_or_else(default_plan)
    }

    /// Resolve the active region set.
    ///
    /// Overrides are applied on top of the configured set, or on top of the
    /// default pair when `eagle.yaml` names no regions. A primary override
    /// takes the primary role and the old primary becomes a secondary; a
    /// secondary override adds a secondary. Configured regions are never
    /// dropped. Default regions the operator did not configure are replaced
    /// rather than kept alongside an override.
    pub fn region_set(&self, primary: Option<&str>, secondary: Option<&str>) -> Result<RegionSet> {
        let (mut regions, configured) = match &self.regions {
            Some(set) => (set.clone().into_vec(), true),
            None => (
                RegionSet::from_pair(DEFAULT_PRIMARY_REGION, Some(DEFAULT_SECONDARY_REGION))?
                    .into_vec(),
                false,
            ),
        };

        if let Some(id) = primary {
            match regions.iter().position(|r| r.id == id) {
                Some(target) => {
                    for r in &mut regions {
                        r.role = RegionRole::Secondary;
                    }
                    regions[target].role = RegionRole::Primary;
                }
                None if configured => {
                    for r in &mut regions {
                        r.role = RegionRole::Secondary;
                    }
                    regions.insert(0, Region::new(id, RegionRole::Primary));
                }
                None => {
                    if let Some(slot) = regions.iter_mut().find(|r| r.is_primary()) {
                        *slot = Region::new(id, RegionRole::Primary);
                    }
                }
            }
        }

        if let Some(id) = secondary {
            match regions.iter().find(|r| r.id == id) {
                Some(r) if r.is_primary() => {
                    return Err(EagleError::InvalidRegionSet(format!(
                        "region '{id}' cannot be both primary and secondary"
                    )));
                }
                Some(_) => {}
                None if configured => regions.push(Region::new(id, RegionRole::Secondary)),
                None => {
                    if let Some(slot) = regions.iter_mut().find(|r| !r.is_primary()) {
                        *slot = Region::new(id, RegionRole::Secondary);
                    }
                }
            }
        }

        RegionSet::new(regions)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.namespace.trim().is_empty() {
            warnings.push(ConfigWarning::error("namespace is empty"));
        }

        // 1. Phase names unique and non-empty
        let plan = self.plan();
        let mut seen = BTreeSet::new();
        for phase in &plan {
            if phase.name.trim().is_empty() {
                warnings.push(ConfigWarning::error("phase with empty name"));
            } else if !seen.insert(phase.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate phase name '{}'",
                    phase.name
                )));
            }
        }

        // 2. Phases that do nothing
        for phase in &plan {
            if phase.actions.is_empty() && phase.health.target == ReadinessTarget::None {
                warnings.push(ConfigWarning::warning(format!(
                    "phase '{}' has no actions and no health check",
                    phase.name
                )));
            }
        }

        // 3. Health gates that cannot succeed or will wait a long time
        for phase in &plan {
            let policy = &phase.health.policy;
            if phase.health.target != ReadinessTarget::None && policy.max_attempts == 0 {
                warnings.push(ConfigWarning::error(format!(
                    "phase '{}' health check has max_attempts = 0 and can never pass",
                    phase.name
                )));
            }
            if policy.interval_seconds == 0 && policy.max_attempts > 1 {
                warnings.push(ConfigWarning::warning(format!(
                    "phase '{}' health check polls without any interval",
                    phase.name
                )));
            }
        }

        // 4. Replicated actions need a primary-first rollout
        for phase in &plan {
            if phase.is_replicated() && !phase.per_region {
                warnings.push(ConfigWarning::warning(format!(
                    "phase '{}' replicates data but targets only the primary region",
                    phase.name
                )));
            }
        }

        // 5. Conflict policy references
        if let Some(regions) = &self.regions {
            for r in &self.conflicts.source_ranking {
                if regions.get(r).is_none() {
                    warnings.push(ConfigWarning::warning(format!(
                        "conflicts.source_ranking names unknown region '{r}'"
                    )));
                }
            }
        }
        for (category, strategy) in &self.conflicts.categories {
            if *strategy == Strategy::SourcePriority && self.conflicts.source_ranking.is_empty() {
                warnings.push(ConfigWarning::warning(format!(
                    "category '{category}' uses source-priority but conflicts.source_ranking is empty"
                )));
            }
        }

        // 6. Failover without promotion steps only swaps roles
        if self.failover.promote.is_empty() {
            warnings.push(ConfigWarning::warning(
                "failover.promote is empty; failover will only swap region roles",
            ));
        }
        if self
            .failover
            .promote
            .iter()
            .any(|a| matches!(a, Action::Probe { .. }))
        {
            warnings.push(ConfigWarning::warning(
                "failover.promote contains a probe; probes are removed after failover",
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
