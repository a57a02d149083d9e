use crate::health::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One step of a phase, executed against a single region's cluster.
///
/// Every action is expected to be idempotent on the cluster side: re-applying
/// an unchanged manifest is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Create the run namespace unless it already exists.
    EnsureNamespace,
    /// Apply a manifest file or directory, relative to the project root.
    Apply { manifest: PathBuf },
    /// Primary-flavored manifest on the primary region, replica-flavored
    /// manifest (with `${REGION}`, `${PRIMARY_REGION}` and `${NAMESPACE}`
    /// substituted) on every secondary.
    ApplyReplicated { primary: PathBuf, replica: PathBuf },
    Scale { deployment: String, replicas: u32 },
    /// Secret whose values are read from the operator's environment at
    /// apply time. Only the key → variable mapping is ever stored.
    Secret {
        name: String,
        from_env: BTreeMap<String, String>,
    },
    /// Run a command inside an existing workload, e.g. `statefulset/postgres`.
    Exec {
        resource: String,
        command: Vec<String>,
    },
    /// Ephemeral connectivity-probe pod. Registered for release before it is
    /// created and always deleted when the run ends.
    Probe {
        name: String,
        image: String,
        command: Vec<String>,
    },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::EnsureNamespace => "ensure namespace".to_string(),
            Action::Apply { manifest } => format!("apply {}", manifest.display()),
            Action::ApplyReplicated { primary, replica } => format!(
                "apply {} (primary) / {} (replica)",
                primary.display(),
                replica.display()
            ),
            Action::Scale {
                deployment,
                replicas,
            } => format!("scale {deployment} to {replicas}"),
            Action::Secret { name, .. } => format!("secret {name}"),
            Action::Exec { resource, command } => {
                format!("exec {} in {resource}", command.join(" "))
            }
            Action::Probe { name, .. } => format!("probe {name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessTarget / HealthCheck
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessTarget {
    /// The phase is ready as soon as its actions succeed.
    #[default]
    None,
    NamespaceActive,
    NamespaceAbsent,
    /// `kubectl rollout status` on e.g. `deployment/api-gateway`.
    Rollout { resource: String },
    PodsReady { selector: String },
    PodSucceeded { pod: String },
    /// Ready when the command exits 0 (replication-lag or replica-status
    /// introspection against the datastore or cache).
    Exec {
        resource: String,
        command: Vec<String>,
    },
}

impl ReadinessTarget {
    pub fn describe(&self) -> String {
        match self {
            ReadinessTarget::None => "none".to_string(),
            ReadinessTarget::NamespaceActive => "namespace active".to_string(),
            ReadinessTarget::NamespaceAbsent => "namespace removed".to_string(),
            ReadinessTarget::Rollout { resource } => format!("rollout {resource}"),
            ReadinessTarget::PodsReady { selector } => format!("pods ready [{selector}]"),
            ReadinessTarget::PodSucceeded { pod } => format!("pod {pod} succeeded"),
            ReadinessTarget::Exec { resource, .. } => format!("exec check in {resource}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub target: ReadinessTarget,
    #[serde(flatten)]
    pub policy: RetryPolicy,
}

impl HealthCheck {
    pub fn new(target: ReadinessTarget, policy: RetryPolicy) -> Self {
        Self { target, policy }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Failure degrades the run instead of stopping it.
    #[serde(default)]
    pub optional: bool,
    /// Apply in every region. When false only the primary is targeted.
    #[serde(default = "default_per_region")]
    pub per_region: bool,
    /// A partial multi-region failure counts as a phase failure.
    #[serde(default)]
    pub require_all_regions: bool,
    /// Application workload phase, skipped by `--skip-apps`.
    #[serde(default)]
    pub app: bool,
    #[serde(default)]
    pub health: HealthCheck,
}

fn default_per_region() -> bool {
    true
}

impl Phase {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
            optional: false,
            per_region: true,
            require_all_regions: false,
            app: false,
            health: HealthCheck::default(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn app(mut self) -> Self {
        self.app = true;
        self
    }

    pub fn primary_only(mut self) -> Self {
        self.per_region = false;
        self
    }

    pub fn with_health(mut self, target: ReadinessTarget, policy: RetryPolicy) -> Self {
        self.health = HealthCheck::new(target, policy);
        self
    }

    /// A replicated phase rolls out to the primary first and gates the
    /// secondaries on the primary's health.
    pub fn is_replicated(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::ApplyReplicated { .. }))
    }
}

/// Drop application phases, keeping the relative order of the rest.
pub fn without_apps(phases: Vec<Phase>) -> Vec<Phase> {
    phases.into_iter().filter(|p| !p.app).collect()
}

// ---------------------------------------------------------------------------
// Default plan
// ---------------------------------------------------------------------------

pub const PROBE_POD: &str = "eagle-connectivity-probe";

/// The standard Eagle rollout:
/// namespace → config → data-layer → services → scaling → ingress →
/// monitoring → validation.
pub fn default_plan() -> Vec<Phase> {
    let quick = RetryPolicy::new(12, std::time::Duration::from_secs(5));
    let rollout = RetryPolicy::new(30, std::time::Duration::from_secs(10));

    vec![
        Phase::new("namespace", vec![Action::EnsureNamespace])
            .with_health(ReadinessTarget::NamespaceActive, quick),
        Phase::new(
            "config",
            vec![
                Action::Apply {
                    manifest: "k8s/config".into(),
                },
                Action::Secret {
                    name: "eagle-db-credentials".into(),
                    from_env: BTreeMap::from([
                        ("username".to_string(), "EAGLE_DB_USER".to_string()),
                        ("password".to_string(), "EAGLE_DB_PASSWORD".to_string()),
                    ]),
                },
                Action::Secret {
                    name: "eagle-vault-approle".into(),
                    from_env: BTreeMap::from([
                        ("role_id".to_string(), "VAULT_ROLE_ID".to_string()),
                        ("secret_id".to_string(), "VAULT_SECRET_ID".to_string()),
                    ]),
                },
            ],
        ),
        Phase::new(
            "data-layer",
            vec![
                Action::ApplyReplicated {
                    primary: "k8s/data/postgres-primary.yaml".into(),
                    replica: "k8s/data/postgres-replica.yaml".into(),
                },
                Action::ApplyReplicated {
                    primary: "k8s/data/redis-primary.yaml".into(),
                    replica: "k8s/data/redis-replica.yaml".into(),
                },
            ],
        )
        .with_health(
            ReadinessTarget::Rollout {
                resource: "statefulset/postgres".into(),
            },
            rollout,
        ),
        Phase::new(
            "services",
            vec![Action::Apply {
                manifest: "k8s/services".into(),
            }],
        )
        .app()
        .with_health(
            ReadinessTarget::PodsReady {
                selector: "tier=service".into(),
            },
            rollout,
        ),
        Phase::new(
            "scaling",
            vec![Action::Apply {
                manifest: "k8s/scaling".into(),
            }],
        )
        .app(),
        Phase::new(
            "ingress",
            vec![Action::Apply {
                manifest: "k8s/ingress".into(),
            }],
        )
        .app(),
        Phase::new(
            "monitoring",
            vec![Action::Apply {
                manifest: "k8s/monitoring".into(),
            }],
        )
        .optional()
        .with_health(
            ReadinessTarget::PodsReady {
                selector: "app=prometheus".into(),
            },
            quick,
        ),
        Phase::new(
            "validation",
            vec![Action::Probe {
                name: PROBE_POD.into(),
                image: "busybox:1.36".into(),
                command: vec![
                    "sh".into(),
                    "-c".into(),
                    "nc -z -w 5 postgres 5432 && nc -z -w 5 redis 6379".into(),
                ],
            }],
        )
        .optional()
        .with_health(
            ReadinessTarget::PodSucceeded {
                pod: PROBE_POD.into(),
            },
            quick,
        ),
    ]
}
