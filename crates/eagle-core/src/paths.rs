use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const EAGLE_DIR: &str = ".eagle";
pub const RUNS_DIR: &str = ".eagle/runs";
pub const CONFLICT_LOG_FILE: &str = ".eagle/conflicts.redb";

pub const CONFIG_FILE: &str = "eagle.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

/// Run records sort lexically by start time: `<YYYYmmddTHHMMSSZ>-<uuid>.yaml`.
pub fn run_path(root: &Path, stamp: &str, id: &str) -> PathBuf {
    runs_dir(root).join(format!("{stamp}-{id}.yaml"))
}

pub fn conflict_log_path(root: &Path) -> PathBuf {
    root.join(CONFLICT_LOG_FILE)
}
