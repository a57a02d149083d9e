use std::path::{Path, PathBuf};

use eagle_core::paths;

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `EAGLE_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `eagle.yaml` or `.eagle/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root_from(&cwd).unwrap_or(cwd)
}

fn is_root(dir: &Path) -> bool {
    dir.join(paths::CONFIG_FILE).is_file() || dir.join(paths::EAGLE_DIR).is_dir()
}

fn find_root_from(start: &Path) -> Option<PathBuf> {
    start.ancestors().find(|d| is_root(d)).map(Path::to_path_buf)
}
