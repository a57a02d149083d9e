use thiserror::Error;

#[derive(Debug, Error)]
pub enum EagleError {
    #[error("not initialized: no eagle.yaml found (run 'eagle-deploy plan' to see the default plan)")]
    NotInitialized,

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("phase '{phase}' failed in region '{region}': {reason}")]
    PhaseActionFailed {
        phase: String,
        region: String,
        reason: String,
    },

    #[error("phase '{phase}' timed out in region '{region}' after {attempts} attempt(s)")]
    PhaseTimeout {
        phase: String,
        region: String,
        attempts: u32,
    },

    #[error("phase '{phase}' partially failed: {failed} region(s) failed")]
    PartialRegionFailure { phase: String, failed: usize },

    #[error("conflict on '{entity}' rejected and queued for manual review")]
    ConflictUnresolved { entity: String },

    #[error("conflict on '{0}' is already open for review; settle it first")]
    ConflictAlreadyOpen(String),

    #[error("invalid conflict: {0}")]
    InvalidConflict(String),

    #[error("conflict record not found: {0}")]
    ConflictNotFound(String),

    #[error("invalid region set: {0}")]
    InvalidRegionSet(String),

    #[error("region not found: {0}")]
    RegionNotFound(String),

    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("audit log error: {0}")]
    AuditLog(String),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EagleError>;
